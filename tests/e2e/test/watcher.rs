use crate::{DATASET, deployment, deployments_spec, registry};

use quasar_core::metrics::Metrics;
use quasar_store::DualStore;
use quasar_store::dummy::{DummyStore, Operation};
use quasar_watcher::replay::{Replay, SecondaryReplay};
use quasar_watcher::{Error, ResourceWatcher, WatchEvent};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn pipeline(replay: Option<Arc<dyn Replay>>) -> (Arc<DummyStore>, ResourceWatcher, Metrics) {
    let primary = Arc::new(DummyStore::new(registry()));
    let dual = DualStore::new(primary.clone(), None);
    let metrics = Metrics::new();
    let watcher = ResourceWatcher::new(
        deployments_spec(),
        dual,
        replay,
        metrics.clone(),
        CancellationToken::new(),
    );
    (primary, watcher, metrics)
}

fn gauge_value(metrics: &Metrics) -> i64 {
    let encoded = metrics.encode().unwrap();
    encoded
        .lines()
        .find(|line| line.starts_with("quasar_managed_resources{"))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_event_sequence_reaches_primary_in_order() {
    let (primary, watcher, metrics) = pipeline(None);
    let (tx, mut rx) = mpsc::channel(16);

    let sequence = [
        WatchEvent::Add(deployment("x", "1")),
        WatchEvent::Update {
            old: deployment("x", "1"),
            new: deployment("x", "2"),
        },
        // unchanged resource version: must be dropped
        WatchEvent::Update {
            old: deployment("x", "2"),
            new: deployment("x", "2"),
        },
        WatchEvent::Delete(deployment("x", "2")),
    ];
    for event in sequence {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    watcher.run(&mut rx).await.unwrap();

    assert_eq!(
        primary.operations(),
        vec![
            Operation::Create {
                dataset: DATASET.to_string(),
                key: "uid-x".to_string(),
            },
            Operation::Update {
                dataset: DATASET.to_string(),
                key: "uid-x".to_string(),
            },
            Operation::Delete {
                dataset: DATASET.to_string(),
                key: "uid-x".to_string(),
            },
        ]
    );
    assert_eq!(gauge_value(&metrics), 0);
}

#[tokio::test]
async fn test_gauge_follows_add_and_delete() {
    let (_primary, watcher, metrics) = pipeline(None);

    watcher
        .handle_event(WatchEvent::Add(deployment("x", "1")))
        .await
        .unwrap();
    assert_eq!(gauge_value(&metrics), 1);

    watcher
        .handle_event(WatchEvent::Delete(deployment("x", "1")))
        .await
        .unwrap();
    assert_eq!(gauge_value(&metrics), 0);
}

#[tokio::test]
async fn test_presync_watch_error_replays_secondary_then_turns_fatal() {
    let secondary = Arc::new(DummyStore::new(registry()));
    secondary.seed(DATASET, "a", deployment("a", "1"));
    secondary.seed(DATASET, "b", deployment("b", "1"));
    let replay: Arc<dyn Replay> = Arc::new(SecondaryReplay::new(secondary));
    let (primary, watcher, _metrics) = pipeline(Some(replay));

    let (tx, mut rx) = mpsc::channel(16);
    let run = tokio::spawn(async move {
        let result = watcher.run(&mut rx).await;
        (result, rx)
    });

    tx.send(WatchEvent::WatchError("watch failed".to_string()))
        .await
        .unwrap();
    // second pre-sync error: the replay is consumed, so this one is fatal
    tx.send(WatchEvent::WatchError("watch failed again".to_string()))
        .await
        .unwrap();

    let (result, _rx) = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::WatchFailed(_))));

    assert_eq!(
        primary.operations(),
        vec![
            Operation::Create {
                dataset: DATASET.to_string(),
                key: "uid-a".to_string(),
            },
            Operation::Create {
                dataset: DATASET.to_string(),
                key: "uid-b".to_string(),
            },
        ]
    );
}
