use crate::StoreKind;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Distinguished sentinel for reads of absent resources.
    #[error("resource not found")]
    NotFound,

    /// Reads were attempted while the primary store is unreachable.
    #[error("no connected store")]
    NoConnectedStore,

    #[error("{0} store is not connected")]
    Disconnected(StoreKind),

    #[error("no {0} store configured")]
    StoreNotConfigured(StoreKind),

    #[error("{0} store is not initialized")]
    NotInitialized(StoreKind),

    #[error("resource has no canonical key")]
    MissingKey,

    #[error("resource does not match any configured kind")]
    UnknownResourceKind,

    #[error("{0}: {1}")]
    MongoError(String, #[source] Box<mongodb::error::Error>),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    BsonError(String, #[source] Box<mongodb::bson::ser::Error>),

    #[error("data source error: {0}")]
    DataSourceError(String),

    #[error("store synchronization failed for {failed} of {total} resources")]
    SyncFailed { failed: u64, total: u64 },

    #[error("store synchronization cancelled")]
    SyncCancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
