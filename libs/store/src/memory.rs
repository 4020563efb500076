//! In-memory grid adapter.
//!
//! Datasets are maps keyed by canonical key; values are the JSON resource
//! bodies. The adapter carries the grid client configuration (cluster name,
//! addresses, timeouts, reconnect strategy) and a connection-state machine
//! with a subscriber list: lifecycle events from the underlying client are
//! fed in through [`GridStore::set_connected`], which is also how tests
//! drive transitions synthetically. In the embedded rendition the grid
//! becomes reachable at [`Store::initialize`] time.

use crate::error::{Error, Result};
use crate::{ConnectionListener, DataSource, Store, StoreKind, resolve_target, selector};

use quasar_core::config::{GridIndexConfig, HazelcastConfig, ResourceConfig};
use quasar_core::resource::ResourceRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

type Dataset = HashMap<String, Value>;

pub struct GridStore {
    config: HazelcastConfig,
    registry: Arc<ResourceRegistry>,
    datasets: RwLock<HashMap<String, Dataset>>,
    indexes: RwLock<HashMap<String, Vec<GridIndexConfig>>>,
    connected: AtomicBool,
    listeners: RwLock<Vec<ConnectionListener>>,
}

impl GridStore {
    pub fn new(config: HazelcastConfig, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            config,
            registry,
            datasets: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Feed a connection lifecycle transition into the adapter. Listeners
    /// fire only on actual state changes.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return;
        }
        info!(
            msg = "grid connection state changed",
            cluster = %self.config.cluster_name,
            connected,
        );
        for listener in self.listeners.read().iter() {
            listener(connected);
        }
    }

    fn guard_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Disconnected(StoreKind::Grid))
        }
    }
}

#[async_trait]
impl Store for GridStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Grid
    }

    async fn initialize(&self) -> Result<()> {
        info!(
            msg = "initializing grid store",
            cluster = %self.config.cluster_name,
            addresses = ?self.config.addresses,
            unisocket = self.config.unisocket,
        );
        self.set_connected(true);
        Ok(())
    }

    async fn initialize_resource(
        &self,
        _data_source: Option<Arc<dyn DataSource>>,
        spec: &ResourceConfig,
    ) -> Result<()> {
        let dataset = spec.kubernetes.dataset();
        self.datasets.write().entry(dataset.clone()).or_default();
        if !spec.hazelcast_indexes.is_empty() {
            debug!(
                msg = "applying grid indexes",
                dataset,
                indexes = spec.hazelcast_indexes.len(),
            );
            self.indexes
                .write()
                .insert(dataset, spec.hazelcast_indexes.clone());
        }
        Ok(())
    }

    async fn create(&self, resource: &Value) -> Result<()> {
        self.guard_connected()?;
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        self.datasets
            .write()
            .entry(dataset)
            .or_default()
            .insert(key, resource.clone());
        Ok(())
    }

    async fn update(&self, old: &Value, new: &Value) -> Result<()> {
        self.guard_connected()?;
        let (dataset, key) = resolve_target(&self.registry, old)?;
        self.datasets
            .write()
            .entry(dataset)
            .or_default()
            .insert(key, new.clone());
        Ok(())
    }

    async fn delete(&self, resource: &Value) -> Result<()> {
        self.guard_connected()?;
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        if let Some(entries) = self.datasets.write().get_mut(&dataset) {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn read(&self, dataset: &str, key: &str) -> Result<Value> {
        self.guard_connected()?;
        self.datasets
            .read()
            .get(dataset)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list(&self, dataset: &str, field_selector: &str, limit: i64) -> Result<Vec<Value>> {
        self.guard_connected()?;
        let filters = selector::parse(field_selector).unwrap_or_default();
        let datasets = self.datasets.read();
        let Some(entries) = datasets.get(dataset) else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<(&String, &Value)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let mut items = Vec::new();
        for (_, value) in sorted {
            if !selector::matches(value, &filters) {
                continue;
            }
            items.push(value.clone());
            if limit > 0 && items.len() as i64 >= limit {
                break;
            }
        }
        Ok(items)
    }

    async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        self.guard_connected()?;
        let mut keys: Vec<String> = self
            .datasets
            .read()
            .get(dataset)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn count(&self, dataset: &str) -> Result<u64> {
        self.guard_connected()?;
        Ok(self
            .datasets
            .read()
            .get(dataset)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0))
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(msg = "grid store shut down", cluster = %self.config.cluster_name);
        }
        Ok(())
    }

    fn subscribe_connection(&self, listener: ConnectionListener) {
        self.listeners.write().push(listener);
    }
}
