use crate::config::{KubernetesResource, TelemetryConfig};
use crate::error::{Error, Result};
use crate::resource::path_value;

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Dynamic label set: the configured telemetry labels differ per resource
/// kind, so label names are not known at compile time.
pub type LabelSet = Vec<(String, String)>;

/// Path-prefix marking a telemetry label value as a lookup into the
/// resource instead of a literal.
const LABEL_PATH_PREFIX: &str = "$.";

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    managed_resources: Family<LabelSet, Gauge>,
    kubernetes_resources: Family<LabelSet, Gauge>,
    watch_operations_failed: Family<LabelSet, Counter>,
    reconcile_runs: Family<LabelSet, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("quasar");

        let managed_resources = Family::<LabelSet, Gauge>::default();
        registry.register(
            "managed_resources",
            "Number of resources currently mirrored into the primary store",
            managed_resources.clone(),
        );

        let kubernetes_resources = Family::<LabelSet, Gauge>::default();
        registry.register(
            "kubernetes_resources",
            "Number of resources reported by the Kubernetes API for a watched kind",
            kubernetes_resources.clone(),
        );

        let watch_operations_failed = Family::<LabelSet, Counter>::default();
        registry.register(
            "watch_operations_failed",
            "Total number of watch operations that failed",
            watch_operations_failed.clone(),
        );

        let reconcile_runs = Family::<LabelSet, Counter>::default();
        registry.register(
            "reconcile_runs",
            "Total number of reconciliation passes",
            reconcile_runs.clone(),
        );

        Self {
            registry: Arc::new(registry),
            managed_resources,
            kubernetes_resources,
            watch_operations_failed,
            reconcile_runs,
        }
    }

    /// Encode the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)
            .map_err(|e| Error::FormattingError("failed to encode metrics".to_string(), e))?;
        Ok(buffer)
    }

    pub fn resources_inc(&self, labels: &LabelSet) {
        self.managed_resources.get_or_create(labels).inc();
    }

    pub fn resources_dec(&self, labels: &LabelSet) {
        self.managed_resources.get_or_create(labels).dec();
    }

    pub fn kubernetes_resources_set(&self, labels: &LabelSet, count: i64) {
        self.kubernetes_resources.get_or_create(labels).set(count);
    }

    pub fn watch_operations_failed_inc(&self, labels: &LabelSet) {
        self.watch_operations_failed.get_or_create(labels).inc();
    }

    pub fn reconcile_runs_inc(&self, labels: &LabelSet) {
        self.reconcile_runs.get_or_create(labels).inc();
    }
}

/// Identity labels for a resource kind.
pub fn kind_labels(kind: &KubernetesResource) -> LabelSet {
    vec![
        ("group".to_string(), kind.group.clone()),
        ("version".to_string(), kind.version.clone()),
        ("resource".to_string(), kind.resource.clone()),
    ]
}

/// Identity labels plus the configured telemetry labels resolved against a
/// concrete resource. A `$.`-prefixed value is looked up as a dotted path;
/// non-string and missing lookups resolve to the empty string so the label
/// set stays stable across add and delete.
pub fn telemetry_labels(
    kind: &KubernetesResource,
    telemetry: &TelemetryConfig,
    resource: &serde_json::Value,
) -> LabelSet {
    let mut labels = kind_labels(kind);
    for (name, value) in &telemetry.labels {
        let resolved = match value.strip_prefix(LABEL_PATH_PREFIX) {
            Some(path) => path_value(resource, path)
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_string(),
            None => value.clone(),
        };
        labels.push((name.clone(), resolved));
    }
    labels
}
