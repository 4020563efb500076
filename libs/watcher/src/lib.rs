//! Watcher role: one watch pipeline per configured resource kind, feeding
//! the dual store, plus per-kind periodic reconciliation against the
//! Kubernetes API and a background cardinality gauge.

pub mod error;
pub mod event;
pub mod kube_source;
pub mod metrics_loop;
pub mod replay;
pub mod watcher;

pub use error::{Error, Result};
pub use watcher::{ResourceWatcher, WatchEvent};

use crate::kube_source::{KubeDataSource, dynamic_api};
use crate::replay::{Replay, SecondaryReplay};

use quasar_core::config::Config;
use quasar_core::metrics::Metrics;
use quasar_core::resource::ResourceRegistry;
use quasar_store::reconcile::Reconciliation;
use quasar_store::{DataSource, DualStore};

use std::sync::Arc;

use kube::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the watcher role until the shutdown signal fires or a watcher hits a
/// fatal error. A fatal watcher error cancels the remaining pipelines and
/// is escalated to the caller.
pub async fn run(
    config: &Config,
    client: Client,
    dual: Arc<DualStore>,
    registry: Arc<ResourceRegistry>,
    metrics: Metrics,
    shutdown: CancellationToken,
) -> Result<()> {
    let mode = config.store.hazelcast.reconcile_mode;
    let interval = config.reconciliation_interval();
    let replay_store = dual.secondary();

    let mut watchers = JoinSet::new();
    for spec in registry.specs() {
        let api = dynamic_api(client.clone(), &spec.kubernetes);
        let data_source: Arc<dyn DataSource> =
            Arc::new(KubeDataSource::new(api.clone(), spec));

        let reconciliation = Arc::new(Reconciliation::new(
            data_source.clone(),
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

        tokio::spawn(metrics_loop::run_cardinality_loop(
            api.clone(),
            spec.clone(),
            metrics.clone(),
            shutdown.child_token(),
        ));

        let replay = replay_store
            .clone()
            .map(|store| Arc::new(SecondaryReplay::new(store)) as Arc<dyn Replay>);
        let watcher = ResourceWatcher::new(
            spec.clone(),
            dual.clone(),
            replay,
            metrics.clone(),
            shutdown.child_token(),
        );
        watchers.spawn(async move { watcher.start(api, data_source).await });
    }
    info!(msg = "watcher role started", resources = registry.specs().len());

    while let Some(result) = watchers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shutdown.cancel();
                return Err(e);
            }
            Err(e) => {
                shutdown.cancel();
                return Err(Error::InformerPanic(e.to_string()));
            }
        }
    }
    Ok(())
}
