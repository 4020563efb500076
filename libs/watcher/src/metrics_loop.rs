//! Background cardinality gauge per watched kind.

use quasar_core::config::ResourceConfig;
use quasar_core::metrics::{Metrics, kind_labels};

use std::time::Duration;

use kube::Api;
use kube::api::{DynamicObject, ListParams};
use tokio_util::sync::CancellationToken;
use tracing::error;

pub const LIST_INTERVAL: Duration = Duration::from_secs(15);

/// List the Kubernetes resource on a fixed cadence and publish the count.
/// Errors are logged and the loop keeps going at the same cadence.
pub async fn run_cardinality_loop(
    api: Api<DynamicObject>,
    spec: ResourceConfig,
    metrics: Metrics,
    cancel: CancellationToken,
) {
    let labels = kind_labels(&spec.kubernetes);
    loop {
        match api.list_metadata(&ListParams::default()).await {
            Ok(list) => {
                metrics.kubernetes_resources_set(&labels, list.items.len() as i64);
            }
            Err(e) => {
                error!(
                    msg = "failed to list resources for cardinality gauge",
                    group = %spec.kubernetes.group,
                    version = %spec.kubernetes.version,
                    resource = %spec.kubernetes.resource,
                    %e,
                );
            }
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(LIST_INTERVAL) => {}
        }
    }
}
