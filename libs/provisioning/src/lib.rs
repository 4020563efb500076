//! Provisioning role: HTTP surface for external controllers to manage
//! projected resource state directly, with the durable store as the
//! authority. Startup copies the document store into the grid; the API is
//! readiness-gated until that bulk sync completes.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;

pub use error::ApiError;

use crate::auth::TokenVerifier;

use quasar_core::config::{Config, ResourceConfig, SecurityConfig};
use quasar_core::metrics::Metrics;
use quasar_core::resource::ResourceRegistry;
use quasar_store::reconcile::{Reconciliation, StoreDataSource};
use quasar_store::sync::{DEFAULT_SYNC_DEADLINE, sync_stores};
use quasar_store::{DualStore, Store, StoreKind};

use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const RESOURCES_PREFIX: &str = "/api/v1/resources";
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub dual: Arc<DualStore>,
    pub registry: Arc<ResourceRegistry>,
    pub ready: Arc<AtomicBool>,
    pub verifier: Option<Arc<TokenVerifier>>,
}

impl AppState {
    pub fn new(
        dual: Arc<DualStore>,
        registry: Arc<ResourceRegistry>,
        security: &SecurityConfig,
    ) -> Self {
        let verifier = security
            .enabled
            .then(|| Arc::new(TokenVerifier::new(security)));
        Self {
            dual,
            registry,
            ready: Arc::new(AtomicBool::new(false)),
            verifier,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub(crate) fn spec(
        &self,
        group: &str,
        version: &str,
        resource: &str,
    ) -> Result<ResourceConfig, ApiError> {
        self.registry
            .for_gvr(group, version, resource)
            .cloned()
            .ok_or_else(|| {
                ApiError::bad_request(format!("unknown resource type {group}/{version}/{resource}"))
            })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "READY").into_response()
    } else {
        let mut response = (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("30"));
        response
    }
}

pub fn router(state: AppState) -> Router {
    let resources = Router::new()
        .route("/", get(handlers::list))
        .route("/keys", get(handlers::keys))
        .route("/count", get(handlers::count))
        .route(
            "/{id}",
            get(handlers::get_resource)
                .put(handlers::put_resource)
                .delete(handlers::delete_resource),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::validate_gvr))
        .route_layer(from_fn_with_state(state.clone(), middleware::readiness_gate))
        .route_layer(from_fn_with_state(state.clone(), middleware::authorize));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest(
            &format!("{RESOURCES_PREFIX}/{{group}}/{{version}}/{{resource}}"),
            resources,
        )
        .layer(from_fn(middleware::request_logger))
        .with_state(state)
}

fn document_store(dual: &DualStore) -> Option<Arc<dyn Store>> {
    [Some(dual.primary()), dual.secondary()]
        .into_iter()
        .flatten()
        .find(|store| store.kind() == StoreKind::Document)
}

/// Launch the bulk synchronization in the background with its default
/// deadline; the readiness flag flips once it completes.
pub fn spawn_bulk_sync(state: AppState, specs: Vec<ResourceConfig>, cancel: CancellationToken) {
    let watchdog = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = watchdog.cancelled() => {}
            () = tokio::time::sleep(DEFAULT_SYNC_DEADLINE) => watchdog.cancel(),
        }
    });
    tokio::spawn(async move {
        match sync_stores(cancel, &state.dual, &specs).await {
            Ok(report) => {
                state.set_ready();
                info!(
                    msg = "startup synchronization complete, accepting API traffic",
                    processed_items = report.processed_items,
                );
            }
            Err(e) => error!(msg = "startup synchronization failed", %e),
        }
    });
}

/// Serve the API until the shutdown signal fires; open connections get
/// [`SHUTDOWN_TIMEOUT`] to drain.
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(msg = "provisioning API listening", port);

    let graceful = {
        let shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
    };
    let mut server = std::pin::pin!(graceful.into_future());
    tokio::select! {
        result = &mut server => result,
        () = shutdown.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(msg = "graceful shutdown timed out, dropping open connections");
                    Ok(())
                }
            }
        }
    }
}

/// Production entrypoint: datasets initialized, periodic reconciliation from
/// the document store registered, bulk sync launched asynchronously, then
/// the readiness-gated listener.
pub async fn run(
    config: &Config,
    dual: Arc<DualStore>,
    registry: Arc<ResourceRegistry>,
    metrics: Metrics,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let state = AppState::new(dual.clone(), registry.clone(), &config.provisioning.security);

    for spec in registry.specs() {
        dual.initialize_resource(None, spec)
            .await
            .map_err(std::io::Error::other)?;
    }

    match document_store(&dual) {
        Some(document) => {
            let mode = config.store.hazelcast.reconcile_mode;
            let interval = config.reconciliation_interval();
            for spec in registry.specs() {
                let source = Arc::new(StoreDataSource::new(document.clone(), spec));
                let reconciliation = Arc::new(Reconciliation::new(
                    source,
                    spec.clone(),
                    mode,
                    Some(metrics.clone()),
                ));
                dual.add_reconciliation(reconciliation.clone()).await;
                tokio::spawn(reconciliation.start_periodic(
                    shutdown.child_token(),
                    interval,
                    dual.primary(),
                ));
            }
        }
        None => {
            warn!(msg = "no document store configured, periodic reconciliation disabled");
        }
    }

    spawn_bulk_sync(state.clone(), registry.specs().to_vec(), shutdown.child_token());
    serve(config.provisioning.port, state, shutdown).await
}

/// Synchronous startup variant: the bulk sync runs to completion (its error
/// is fatal) before the listener opens with the readiness flag already set.
pub async fn serve_after_sync(
    port: u16,
    state: AppState,
    specs: Vec<ResourceConfig>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    sync_stores(shutdown.child_token(), &state.dual, &specs)
        .await
        .map_err(std::io::Error::other)?;
    state.set_ready();
    serve(port, state, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use quasar_core::config::KubernetesResource;
    use quasar_store::DummyStore;
    use quasar_store::dummy::Operation;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn deployments_spec() -> ResourceConfig {
        ResourceConfig {
            kubernetes: KubernetesResource {
                group: "apps".to_string(),
                version: "v1".to_string(),
                resource: "deployments".to_string(),
                kind: "Deployment".to_string(),
                namespace: None,
            },
            ..ResourceConfig::default()
        }
    }

    fn deployment(name: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "default", "uid": format!("uid-{name}")},
        })
    }

    fn fixture() -> (AppState, Arc<DummyStore>) {
        let registry = Arc::new(ResourceRegistry::new(vec![deployments_spec()]));
        let primary = Arc::new(DummyStore::new(registry.clone()));
        let dual = DualStore::new(primary.clone(), None);
        let state = AppState::new(dual, registry, &SecurityConfig::default());
        (state, primary)
    }

    fn ready_fixture() -> (AppState, Arc<DummyStore>) {
        let (state, primary) = fixture();
        state.set_ready();
        (state, primary)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_body(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_api_is_gated_until_ready() {
        let (state, _) = fixture();
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

        // health is unconditional
        let response = router(state.clone()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.set_ready();
        let response = router(state.clone())
            .oneshot(get("/api/v1/resources/apps/v1/deployments/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router(state).oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_keys_count() {
        let (state, primary) = ready_fixture();
        primary.seed("deployments.apps.v1", "uid-a", deployment("a"));
        primary.seed("deployments.apps.v1", "uid-b", deployment("b"));

        let response = router(state.clone())
            .oneshot(get("/api/v1/resources/apps/v1/deployments/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["items"].as_array().unwrap().len(), 2);

        let response = router(state.clone())
            .oneshot(get("/api/v1/resources/apps/v1/deployments/keys"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["keys"], json!(["uid-a", "uid-b"]));

        let response = router(state)
            .oneshot(get("/api/v1/resources/apps/v1/deployments/count"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], json!(2));
    }

    #[tokio::test]
    async fn test_get_resource_and_not_found_shape() {
        let (state, primary) = ready_fixture();
        primary.seed("deployments.apps.v1", "uid-a", deployment("a"));

        let response = router(state.clone())
            .oneshot(get("/api/v1/resources/apps/v1/deployments/uid-a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["metadata"]["name"], json!("a"));

        let response = router(state)
            .oneshot(get("/api/v1/resources/apps/v1/deployments/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], json!(404));
        assert!(body["error"].is_string());
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_put_upserts_and_defaults_environment() {
        let (state, primary) = ready_fixture();
        let response = router(state)
            .oneshot(with_body(
                "PUT",
                "/api/v1/resources/apps/v1/deployments/web",
                &deployment("web"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            primary.operations(),
            vec![Operation::Create {
                dataset: "deployments.apps.v1".to_string(),
                key: "uid-web".to_string(),
            }]
        );
        let stored = primary.read("deployments.apps.v1", "uid-web").await.unwrap();
        assert_eq!(stored["spec"]["environment"], json!("default"));
    }

    #[tokio::test]
    async fn test_put_validations_reject_without_store_calls() {
        let (state, primary) = ready_fixture();

        // name mismatch
        let response = router(state.clone())
            .oneshot(with_body(
                "PUT",
                "/api/v1/resources/apps/v1/deployments/foo",
                &deployment("bar"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // apiVersion mismatch
        let mut wrong_api = deployment("foo");
        wrong_api["apiVersion"] = json!("apps/v2");
        let response = router(state.clone())
            .oneshot(with_body(
                "PUT",
                "/api/v1/resources/apps/v1/deployments/foo",
                &wrong_api,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // kind mismatch
        let mut wrong_kind = deployment("foo");
        wrong_kind["kind"] = json!("StatefulSet");
        let response = router(state.clone())
            .oneshot(with_body(
                "PUT",
                "/api/v1/resources/apps/v1/deployments/foo",
                &wrong_kind,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // unknown GVR
        let response = router(state.clone())
            .oneshot(with_body(
                "PUT",
                "/api/v1/resources/apps/v1/statefulsets/foo",
                &deployment("foo"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // invalid JSON body
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/resources/apps/v1/deployments/foo")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(primary.operations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_no_content() {
        let (state, primary) = ready_fixture();
        primary.seed("deployments.apps.v1", "uid-web", deployment("web"));
        primary.clear_operations();

        let response = router(state)
            .oneshot(with_body(
                "DELETE",
                "/api/v1/resources/apps/v1/deployments/web",
                &deployment("web"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            primary.operations(),
            vec![Operation::Delete {
                dataset: "deployments.apps.v1".to_string(),
                key: "uid-web".to_string(),
            }]
        );
    }
}
