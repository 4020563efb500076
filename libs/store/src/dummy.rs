//! Recording store used by tests.
//!
//! Behaves like a connected in-memory store, records every write in arrival
//! order, and can be switched into failing or disconnected states to
//! exercise the error paths of the layers above.

use crate::error::{Error, Result};
use crate::{DataSource, Store, StoreKind, resolve_target, selector};

use quasar_core::config::ResourceConfig;
use quasar_core::resource::ResourceRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create { dataset: String, key: String },
    Update { dataset: String, key: String },
    Delete { dataset: String, key: String },
}

type WriteHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct DummyStore {
    registry: Arc<ResourceRegistry>,
    kind: StoreKind,
    datasets: RwLock<HashMap<String, HashMap<String, Value>>>,
    operations: RwLock<Vec<Operation>>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    write_hook: RwLock<Option<WriteHook>>,
}

impl DummyStore {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self::with_kind(registry, StoreKind::Dummy)
    }

    /// A dummy that reports as another store variant, for code paths that
    /// dispatch on the type tag.
    pub fn with_kind(registry: Arc<ResourceRegistry>, kind: StoreKind) -> Self {
        Self {
            registry,
            kind,
            datasets: RwLock::new(HashMap::new()),
            operations: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            write_hook: RwLock::new(None),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Invoked with the total write count after every recorded write; lets
    /// tests trigger cancellation or state flips at a precise point.
    pub fn set_write_hook(&self, hook: WriteHook) {
        *self.write_hook.write() = Some(hook);
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.read().clone()
    }

    pub fn clear_operations(&self) {
        self.operations.write().clear();
    }

    /// Seed a dataset entry directly, bypassing the operation log.
    pub fn seed(&self, dataset: &str, key: &str, resource: Value) {
        self.datasets
            .write()
            .entry(dataset.to_string())
            .or_default()
            .insert(key.to_string(), resource);
    }

    fn record(&self, operation: Operation) {
        let count = {
            let mut operations = self.operations.write();
            operations.push(operation);
            operations.len()
        };
        if let Some(hook) = self.write_hook.read().as_ref() {
            hook(count);
        }
    }

    fn guard_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Disconnected(self.kind));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for DummyStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn initialize(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn initialize_resource(
        &self,
        _data_source: Option<Arc<dyn DataSource>>,
        spec: &ResourceConfig,
    ) -> Result<()> {
        self.datasets
            .write()
            .entry(spec.kubernetes.dataset())
            .or_default();
        Ok(())
    }

    async fn create(&self, resource: &Value) -> Result<()> {
        self.guard_write()?;
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        self.datasets
            .write()
            .entry(dataset.clone())
            .or_default()
            .insert(key.clone(), resource.clone());
        self.record(Operation::Create { dataset, key });
        Ok(())
    }

    async fn update(&self, old: &Value, new: &Value) -> Result<()> {
        self.guard_write()?;
        let (dataset, key) = resolve_target(&self.registry, old)?;
        self.datasets
            .write()
            .entry(dataset.clone())
            .or_default()
            .insert(key.clone(), new.clone());
        self.record(Operation::Update { dataset, key });
        Ok(())
    }

    async fn delete(&self, resource: &Value) -> Result<()> {
        self.guard_write()?;
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        if let Some(entries) = self.datasets.write().get_mut(&dataset) {
            entries.remove(&key);
        }
        self.record(Operation::Delete { dataset, key });
        Ok(())
    }

    async fn read(&self, dataset: &str, key: &str) -> Result<Value> {
        self.datasets
            .read()
            .get(dataset)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list(&self, dataset: &str, field_selector: &str, limit: i64) -> Result<Vec<Value>> {
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
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
