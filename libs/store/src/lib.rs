//! Store adapters and the dual-store management layer.
//!
//! A [`Store`] owns a connection to one backing system and exposes the
//! capability set the rest of the service is written against. Adapters are
//! polymorphic behind `Arc<dyn Store>`; the [`DualStore`] composes a primary
//! and an optional secondary adapter with asymmetric write durability.

pub mod dual;
pub mod dummy;
pub mod error;
pub mod memory;
pub mod mongo;
pub mod reconcile;
pub mod selector;
pub mod sync;

pub use dual::DualStore;
pub use dummy::DummyStore;
pub use error::{Error, Result};
pub use memory::GridStore;
pub use mongo::MongoStore;

use quasar_core::config::{Config, ResourceConfig, StoreType};
use quasar_core::resource::ResourceRegistry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Type tag identifying the backing system of an adapter, independent of
/// which role (primary or secondary) it is configured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Grid,
    Document,
    Dummy,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::Grid => "grid",
            StoreKind::Document => "document",
            StoreKind::Dummy => "dummy",
        };
        f.write_str(name)
    }
}

/// Callback invoked with the new reachability on connection transitions.
pub type ConnectionListener = Box<dyn Fn(bool) + Send + Sync>;

/// Source of truth a reconciliation compares a store against.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn list_resources(&self) -> Result<Vec<Value>>;
}

#[async_trait]
pub trait Store: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Establish the connection. Failure here is fatal to the process.
    async fn initialize(&self) -> Result<()>;

    /// Apply dataset-scoped setup (index creation). The data source is
    /// opaque to most adapters; variants with a connection lifecycle keep
    /// it around so a reconnect can be followed by reconciliation.
    async fn initialize_resource(
        &self,
        data_source: Option<Arc<dyn DataSource>>,
        spec: &ResourceConfig,
    ) -> Result<()>;

    /// Upsert by canonical key; replays and reconciliations rely on this
    /// being idempotent.
    async fn create(&self, resource: &Value) -> Result<()>;

    /// Replace the entry under the canonical key derived from `old`.
    async fn update(&self, old: &Value, new: &Value) -> Result<()>;

    /// Remove by canonical key; absence is not an error.
    async fn delete(&self, resource: &Value) -> Result<()>;

    async fn read(&self, dataset: &str, key: &str) -> Result<Value>;

    /// List resources matching a comma-separated `key=value` selector.
    /// `limit <= 0` means unbounded.
    async fn list(&self, dataset: &str, field_selector: &str, limit: i64) -> Result<Vec<Value>>;

    async fn keys(&self, dataset: &str) -> Result<Vec<String>>;

    async fn count(&self, dataset: &str) -> Result<u64>;

    fn connected(&self) -> bool;

    /// Idempotent release of the adapter's resources.
    async fn shutdown(&self) -> Result<()>;

    /// Register a connection-state listener. Adapters without a runtime
    /// connection lifecycle ignore the registration.
    fn subscribe_connection(&self, _listener: ConnectionListener) {}
}

/// Resolve the dataset and canonical key for a resource through the shared
/// registry, so every adapter derives identical coordinates.
pub(crate) fn resolve_target(
    registry: &ResourceRegistry,
    resource: &Value,
) -> Result<(String, String)> {
    let spec = registry
        .for_resource(resource)
        .ok_or(Error::UnknownResourceKind)?;
    let dataset = spec.kubernetes.dataset();
    let key = spec.canonical_key(resource).ok_or(Error::MissingKey)?;
    Ok((dataset, key))
}

/// Build the adapter for a configured store type. The adapter is inert
/// until [`Store::initialize`] is called.
pub fn build_store(
    store_type: StoreType,
    config: &Config,
    registry: Arc<ResourceRegistry>,
) -> Arc<dyn Store> {
    match store_type {
        StoreType::Hazelcast => Arc::new(GridStore::new(config.store.hazelcast.clone(), registry)),
        StoreType::Mongo => Arc::new(MongoStore::new(config.mongo_section().clone(), registry)),
    }
}
