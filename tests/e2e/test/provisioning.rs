use crate::{DATASET, deployment, deployments_spec, registry};

use quasar_core::config::SecurityConfig;
use quasar_provisioning::{AppState, router, spawn_bulk_sync};
use quasar_store::dummy::DummyStore;
use quasar_store::{DualStore, StoreKind};

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_api_returns_503_until_async_sync_completes() {
    let registry = registry();
    let grid = Arc::new(DummyStore::with_kind(registry.clone(), StoreKind::Grid));
    let document = Arc::new(DummyStore::with_kind(registry.clone(), StoreKind::Document));
    document.seed(DATASET, "a", deployment("a", "1"));
    document.seed(DATASET, "b", deployment("b", "1"));

    // hold the first grid write until the gate opens, keeping the
    // not-ready window observable
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    {
        let gate = gate.clone();
        grid.set_write_hook(Box::new(move |_| {
            let (lock, condvar) = &*gate;
            let mut released = lock.lock().unwrap();
            while !*released {
                released = condvar.wait(released).unwrap();
            }
        }));
    }

    let dual = DualStore::new(grid.clone(), Some(document));
    let state = AppState::new(dual, registry, &SecurityConfig::default());
    spawn_bulk_sync(
        state.clone(),
        vec![deployments_spec()],
        CancellationToken::new(),
    );

    // the sync task is now blocked inside its first write
    let in_flight = grid.clone();
    wait_until(move || !in_flight.operations().is_empty()).await;

    let response = router(state.clone())
        .oneshot(get("/api/v1/resources/apps/v1/deployments/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER),
        Some(&HeaderValue::from_static("30"))
    );
    let response = router(state.clone()).oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    {
        let (lock, condvar) = &*gate;
        *lock.lock().unwrap() = true;
        condvar.notify_all();
    }

    let readiness = state.clone();
    wait_until(move || readiness.ready.load(std::sync::atomic::Ordering::SeqCst)).await;

    let response = router(state.clone())
        .oneshot(get("/api/v1/resources/apps/v1/deployments/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = router(state).oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_put_with_mismatched_name_is_rejected() {
    let registry = registry();
    let primary = Arc::new(DummyStore::new(registry.clone()));
    let dual = DualStore::new(primary.clone(), None);
    let state = AppState::new(dual, registry, &SecurityConfig::default());
    state.set_ready();

    let body = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "bar"},
    });
    let response = router(state)
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/resources/apps/v1/deployments/foo")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(primary.operations().is_empty());
}
