//! Dynamic Kubernetes API plumbing for configured resource kinds.

use quasar_core::config::{KubernetesResource, ResourceConfig};
use quasar_store::{DataSource, Error as StoreError, Result as StoreResult};

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::warn;

/// Build a dynamic API for a configured kind, scoped to its namespace
/// filter when one is set.
pub fn dynamic_api(client: Client, kind: &KubernetesResource) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    let ar = ApiResource::from_gvk_with_plural(&gvk, &kind.resource);
    match kind.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => Api::namespaced_with(client, namespace, &ar),
        _ => Api::all_with(client, &ar),
    }
}

/// Data source listing the Kubernetes API, used to reconcile the primary
/// store against the cluster.
pub struct KubeDataSource {
    api: Api<DynamicObject>,
    label: String,
}

impl KubeDataSource {
    pub fn new(api: Api<DynamicObject>, spec: &ResourceConfig) -> Self {
        let label = format!("kubernetes:{}", spec.kubernetes.dataset());
        Self { api, label }
    }
}

#[async_trait]
impl DataSource for KubeDataSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn list_resources(&self) -> StoreResult<Vec<Value>> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::DataSourceError(e.to_string()))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|object| match serde_json::to_value(&object) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    warn!(msg = "dropping unserializable object from listing", %e);
                    None
                }
            })
            .collect())
    }
}
