//! Shared fixtures for the end-to-end scenario tests.

use quasar_core::config::{KubernetesResource, ResourceConfig, TelemetryConfig};
use quasar_core::resource::ResourceRegistry;

use std::sync::Arc;

use serde_json::{Value, json};

#[cfg(test)]
mod test;

/// The `(apps/v1, deployments)` kind used throughout the scenarios, with
/// telemetry enabled.
pub fn deployments_spec() -> ResourceConfig {
    ResourceConfig {
        kubernetes: KubernetesResource {
            group: "apps".to_string(),
            version: "v1".to_string(),
            resource: "deployments".to_string(),
            kind: "Deployment".to_string(),
            namespace: None,
        },
        prometheus: TelemetryConfig {
            enabled: true,
            labels: Default::default(),
        },
        ..ResourceConfig::default()
    }
}

pub const DATASET: &str = "deployments.apps.v1";

pub fn registry() -> Arc<ResourceRegistry> {
    Arc::new(ResourceRegistry::new(vec![deployments_spec()]))
}

pub fn deployment(name: &str, resource_version: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": format!("uid-{name}"),
            "resourceVersion": resource_version,
        },
        "spec": {"replicas": 1},
    })
}
