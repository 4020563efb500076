use crate::{DATASET, deployment, deployments_spec, registry};

use quasar_store::dummy::DummyStore;
use quasar_store::sync::sync_stores;
use quasar_store::{DualStore, Error, StoreKind};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancellation_mid_transfer_stops_further_writes() {
    let reg = registry();
    let grid = Arc::new(DummyStore::with_kind(reg.clone(), StoreKind::Grid));
    let document = Arc::new(DummyStore::with_kind(reg, StoreKind::Document));
    for i in 0..1000 {
        let name = format!("res-{i:04}");
        document.seed(DATASET, &name, deployment(&name, "1"));
    }
    let dual = DualStore::new(grid.clone(), Some(document));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    grid.set_write_hook(Box::new(move |count| {
        if count == 100 {
            trigger.cancel();
        }
    }));

    let result = sync_stores(cancel, &dual, &[deployments_spec()]).await;
    assert!(matches!(result, Err(Error::SyncCancelled)));
    assert_eq!(grid.operations().len(), 100);
}

#[tokio::test]
async fn test_full_transfer_reports_totals() {
    let reg = registry();
    let grid = Arc::new(DummyStore::with_kind(reg.clone(), StoreKind::Grid));
    let document = Arc::new(DummyStore::with_kind(reg, StoreKind::Document));
    for i in 0..25 {
        let name = format!("res-{i:02}");
        document.seed(DATASET, &name, deployment(&name, "1"));
    }
    let dual = DualStore::new(grid.clone(), Some(document));

    let report = sync_stores(CancellationToken::new(), &dual, &[deployments_spec()])
        .await
        .unwrap();
    assert_eq!(report.completed_resources, 1);
    assert_eq!(report.processed_items, 25);
    assert_eq!(report.total_items, 25);
    assert_eq!(report.failed_items, 0);
    assert_eq!(grid.operations().len(), 25);
}
