//! Primary/secondary store composition.
//!
//! Writes hit the primary synchronously (its error is the caller's error)
//! and are mirrored to the secondary from a detached task whose failure is
//! logged and absorbed; reconciliation closes any resulting gap. Reads are
//! answered by the primary only, and only while it is connected.

use crate::error::{Error, Result};
use crate::reconcile::Reconciliation;
use crate::{DataSource, Store};

use quasar_core::config::ResourceConfig;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct DualStore {
    primary: Arc<dyn Store>,
    secondary: Option<Arc<dyn Store>>,
    reconciliations: RwLock<Vec<Arc<Reconciliation>>>,
    // one reconciliation sweep per connected epoch; cleared on disconnect
    reconciled_epoch: AtomicBool,
    guard: RwLock<()>,
}

impl DualStore {
    pub fn new(primary: Arc<dyn Store>, secondary: Option<Arc<dyn Store>>) -> Arc<Self> {
        let dual = Arc::new(Self {
            primary,
            secondary,
            reconciliations: RwLock::new(Vec::new()),
            reconciled_epoch: AtomicBool::new(false),
            guard: RwLock::new(()),
        });

        let weak = Arc::downgrade(&dual);
        dual.primary
            .subscribe_connection(Box::new(move |connected| {
                let Some(dual) = weak.upgrade() else {
                    return;
                };
                if connected {
                    if !dual.reconciled_epoch.swap(true, Ordering::SeqCst) {
                        tokio::spawn(async move { dual.reconcile_all().await });
                    }
                } else {
                    dual.reconciled_epoch.store(false, Ordering::SeqCst);
                }
            }));
        dual
    }

    pub fn primary(&self) -> Arc<dyn Store> {
        self.primary.clone()
    }

    pub fn secondary(&self) -> Option<Arc<dyn Store>> {
        self.secondary.clone()
    }

    async fn reconcile_all(self: Arc<Self>) {
        let reconciliations = self.reconciliations.read().await.clone();
        if reconciliations.is_empty() {
            return;
        }
        info!(
            msg = "primary store connected, running reconciliations",
            count = reconciliations.len(),
        );
        for reconciliation in reconciliations {
            reconciliation.safe_reconcile(self.primary.clone()).await;
        }
    }

    pub async fn add_reconciliation(&self, reconciliation: Arc<Reconciliation>) {
        let _structure = self.guard.write().await;
        self.reconciliations.write().await.push(reconciliation);
    }

    pub async fn reconciliations(&self) -> Vec<Arc<Reconciliation>> {
        self.reconciliations.read().await.clone()
    }

    pub async fn initialize_resource(
        &self,
        data_source: Option<Arc<dyn DataSource>>,
        spec: &ResourceConfig,
    ) -> Result<()> {
        let _operation = self.guard.read().await;
        self.primary
            .initialize_resource(data_source.clone(), spec)
            .await?;
        if let Some(secondary) = &self.secondary {
            secondary.initialize_resource(data_source, spec).await?;
        }
        Ok(())
    }

    pub async fn create(&self, resource: &Value) -> Result<()> {
        let _operation = self.guard.read().await;
        self.primary.create(resource).await?;
        if let Some(secondary) = &self.secondary {
            let secondary = secondary.clone();
            let resource = resource.clone();
            tokio::spawn(async move {
                if let Err(e) = secondary.create(&resource).await {
                    warn!(
                        msg = "secondary store create failed",
                        store = %secondary.kind(),
                        operation = "create",
                        %e,
                    );
                }
            });
        }
        Ok(())
    }

    pub async fn update(&self, old: &Value, new: &Value) -> Result<()> {
        let _operation = self.guard.read().await;
        self.primary.update(old, new).await?;
        if let Some(secondary) = &self.secondary {
            let secondary = secondary.clone();
            let old = old.clone();
            let new = new.clone();
            tokio::spawn(async move {
                if let Err(e) = secondary.update(&old, &new).await {
                    warn!(
                        msg = "secondary store update failed",
                        store = %secondary.kind(),
                        operation = "update",
                        %e,
                    );
                }
            });
        }
        Ok(())
    }

    pub async fn delete(&self, resource: &Value) -> Result<()> {
        let _operation = self.guard.read().await;
        self.primary.delete(resource).await?;
        if let Some(secondary) = &self.secondary {
            let secondary = secondary.clone();
            let resource = resource.clone();
            tokio::spawn(async move {
                if let Err(e) = secondary.delete(&resource).await {
                    warn!(
                        msg = "secondary store delete failed",
                        store = %secondary.kind(),
                        operation = "delete",
                        %e,
                    );
                }
            });
        }
        Ok(())
    }

    fn connected_primary(&self) -> Result<&Arc<dyn Store>> {
        if self.primary.connected() {
            Ok(&self.primary)
        } else {
            Err(Error::NoConnectedStore)
        }
    }

    pub async fn read(&self, dataset: &str, key: &str) -> Result<Value> {
        let _operation = self.guard.read().await;
        self.connected_primary()?.read(dataset, key).await
    }

    pub async fn list(
        &self,
        dataset: &str,
        field_selector: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let _operation = self.guard.read().await;
        self.connected_primary()?
            .list(dataset, field_selector, limit)
            .await
    }

    pub async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        let _operation = self.guard.read().await;
        self.connected_primary()?.keys(dataset).await
    }

    pub async fn count(&self, dataset: &str) -> Result<u64> {
        let _operation = self.guard.read().await;
        self.connected_primary()?.count(dataset).await
    }

    pub async fn shutdown(&self) {
        let _structure = self.guard.write().await;
        if let Err(e) = self.primary.shutdown().await {
            warn!(msg = "primary store shutdown failed", store = %self.primary.kind(), %e);
        }
        if let Some(secondary) = &self.secondary {
            if let Err(e) = secondary.shutdown().await {
                warn!(msg = "secondary store shutdown failed", store = %secondary.kind(), %e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyStore, Operation};
    use crate::memory::GridStore;

    use quasar_core::config::{
        HazelcastConfig, KubernetesResource, ReconcileMode, ResourceConfig,
    };
    use quasar_core::resource::ResourceRegistry;

    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

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

    fn registry() -> Arc<ResourceRegistry> {
        Arc::new(ResourceRegistry::new(vec![deployments_spec()]))
    }

    fn deployment(name: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "default", "uid": name},
        })
    }

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
        for _ in 0..100 {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_reads_fail_without_connected_primary() {
        let primary = Arc::new(DummyStore::new(registry()));
        primary.set_connected(false);
        let dual = DualStore::new(primary, None);

        assert!(matches!(
            dual.read("deployments.apps.v1", "a").await,
            Err(Error::NoConnectedStore)
        ));
        assert!(matches!(
            dual.count("deployments.apps.v1").await,
            Err(Error::NoConnectedStore)
        ));
    }

    #[tokio::test]
    async fn test_secondary_write_is_fire_and_forget() {
        let primary = Arc::new(DummyStore::new(registry()));
        let secondary = Arc::new(DummyStore::new(registry()));
        let dual = DualStore::new(primary.clone(), Some(secondary.clone()));

        dual.create(&deployment("web")).await.unwrap();
        assert_eq!(primary.operations().len(), 1);

        wait_until(async || secondary.operations().len() == 1).await;
    }

    #[tokio::test]
    async fn test_secondary_failure_is_absorbed() {
        let primary = Arc::new(DummyStore::new(registry()));
        let secondary = Arc::new(DummyStore::new(registry()));
        secondary.set_fail_writes(true);
        let dual = DualStore::new(primary.clone(), Some(secondary.clone()));

        dual.create(&deployment("web")).await.unwrap();
        dual.delete(&deployment("web")).await.unwrap();
        assert_eq!(
            primary.operations(),
            vec![
                Operation::Create {
                    dataset: "deployments.apps.v1".to_string(),
                    key: "web".to_string(),
                },
                Operation::Delete {
                    dataset: "deployments.apps.v1".to_string(),
                    key: "web".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_primary_failure_propagates() {
        let primary = Arc::new(DummyStore::new(registry()));
        primary.set_fail_writes(true);
        let dual = DualStore::new(primary, None);
        assert!(dual.create(&deployment("web")).await.is_err());
    }

    #[tokio::test]
    async fn test_reconcile_fires_once_per_connected_epoch() {
        let grid = Arc::new(GridStore::new(HazelcastConfig::default(), registry()));
        let dual = DualStore::new(grid.clone(), None);

        let calls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(CountingSource {
            resources: vec![deployment("a"), deployment("b")],
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
        wait_until(async || grid.count("deployments.apps.v1").await.unwrap_or(0) == 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a new epoch requires a disconnect first
        grid.set_connected(false);
        grid.set_connected(true);
        wait_until(async || calls.load(Ordering::SeqCst) == 2).await;
    }
}
