use crate::{DATASET, deployment, deployments_spec, registry};

use quasar_core::config::{HazelcastConfig, ReconcileMode};
use quasar_store::memory::GridStore;
use quasar_store::reconcile::Reconciliation;
use quasar_store::{DataSource, DualStore, Result, Store};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;

struct CountingSource {
    resources: Vec<Value>,
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl DataSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list_resources(&self) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources.clone())
    }
}

async fn wait_until(mut probe: impl AsyncFnMut() -> bool) {
    for _ in 0..200 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_connect_event_triggers_one_reconciliation_per_epoch() {
    let grid = Arc::new(GridStore::new(HazelcastConfig::default(), registry()));
    let dual = DualStore::new(grid.clone(), None);

    let calls = Arc::new(AtomicUsize::new(0));
    let source = Arc::new(CountingSource {
        resources: vec![deployment("a", "1"), deployment("b", "1")],
        calls: calls.clone(),
    });
    dual.add_reconciliation(Arc::new(Reconciliation::new(
        source,
        deployments_spec(),
        ReconcileMode::Incremental,
        None,
    )))
    .await;

    grid.set_connected(true);
    wait_until(async || grid.count(DATASET).await.unwrap_or(0) == 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // a repeated connected notification inside the same epoch is a no-op
    grid.set_connected(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // only a disconnect opens a new epoch
    grid.set_connected(false);
    grid.set_connected(true);
    wait_until(async || calls.load(Ordering::SeqCst) == 2).await;
}
