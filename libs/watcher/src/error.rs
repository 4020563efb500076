use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    StoreError(#[from] quasar_store::Error),

    #[error("watch stream failed: {0}")]
    WatchFailed(String),

    #[error("replay from secondary store failed")]
    ReplayFailed(#[source] quasar_store::Error),

    #[error("no secondary store configured for replay")]
    NoReplaySource,

    #[error("informer task failed: {0}")]
    InformerPanic(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
