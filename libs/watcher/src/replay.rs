//! One-shot rehydration source for pre-sync watch failures.

use quasar_store::{Result, Store};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Enumerates the durable copies of a dataset so the watcher can rebuild a
/// cold primary before its first successful sync.
#[async_trait]
pub trait Replay: Send + Sync {
    async fn list(&self, dataset: &str) -> Result<Vec<Value>>;
}

/// Replays the documents of the dual store's secondary.
pub struct SecondaryReplay {
    store: Arc<dyn Store>,
}

impl SecondaryReplay {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Replay for SecondaryReplay {
    async fn list(&self, dataset: &str) -> Result<Vec<Value>> {
        self.store.list(dataset, "", 0).await
    }
}
