//! Drift repair between a data source and a store.
//!
//! A reconciliation pairs one data source (the Kubernetes API or another
//! store) with one resource kind. Passes run under a try-lock so concurrent
//! triggers (periodic tick racing a reconnect event) short-circuit instead
//! of piling up, and the pass body runs in its own task so a panic is
//! contained and logged.

use crate::error::Result;
use crate::{DataSource, Store};

use quasar_core::config::{ReconcileMode, ResourceConfig};
use quasar_core::metrics::{Metrics, kind_labels};
use quasar_core::resource::{ensure_environment, name};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Reconciliation {
    data_source: Arc<dyn DataSource>,
    spec: ResourceConfig,
    mode: ReconcileMode,
    metrics: Option<Metrics>,
    lock: Mutex<()>,
}

impl Reconciliation {
    pub fn new(
        data_source: Arc<dyn DataSource>,
        spec: ResourceConfig,
        mode: ReconcileMode,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            data_source,
            spec,
            mode,
            metrics,
            lock: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> &ResourceConfig {
        &self.spec
    }

    /// Non-reentrant reconciliation entrypoint: returns immediately if a
    /// pass is already running for this pair. The pass runs in a spawned
    /// task so a panic is recovered with an error log; the lock is released
    /// on every exit path.
    pub async fn safe_reconcile(self: Arc<Self>, target: Arc<dyn Store>) {
        let Ok(_guard) = self.lock.try_lock() else {
            debug!(
                msg = "reconciliation already running, skipping",
                source = self.data_source.name(),
                resource = %self.spec.kubernetes.resource,
            );
            return;
        };
        let this = self.clone();
        match tokio::spawn(async move { this.reconcile(target).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    msg = "reconciliation pass failed",
                    source = self.data_source.name(),
                    resource = %self.spec.kubernetes.resource,
                    %e,
                );
            }
            Err(e) => {
                error!(
                    msg = "reconciliation pass panicked",
                    source = self.data_source.name(),
                    resource = %self.spec.kubernetes.resource,
                    %e,
                );
            }
        }
    }

    async fn reconcile(&self, target: Arc<dyn Store>) -> Result<()> {
        let dataset = self.spec.kubernetes.dataset();
        // A data-source error aborts the pass before anything is written.
        let resources = self.data_source.list_resources().await?;

        let existing: HashSet<String> = match self.mode {
            ReconcileMode::Incremental => target.keys(&dataset).await?.into_iter().collect(),
            ReconcileMode::Full => HashSet::new(),
        };

        let mut created = 0u64;
        let mut skipped = 0u64;
        let mut failed = 0u64;
        for mut resource in resources {
            if self.mode == ReconcileMode::Incremental {
                // The diff key is the observable name the target exposes,
                // independent of the canonical key choice.
                let Some(resource_name) = name(&resource).map(str::to_string) else {
                    skipped += 1;
                    continue;
                };
                if existing.contains(&resource_name) {
                    skipped += 1;
                    continue;
                }
            }
            ensure_environment(&mut resource);
            match target.create(&resource).await {
                Ok(()) => created += 1,
                Err(e) => {
                    warn!(
                        msg = "reconciliation write failed",
                        dataset,
                        operation = "create",
                        name = name(&resource).unwrap_or_default(),
                        %e,
                    );
                    failed += 1;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.reconcile_runs_inc(&kind_labels(&self.spec.kubernetes));
        }
        info!(
            msg = "reconciliation pass complete",
            source = self.data_source.name(),
            dataset,
            mode = ?self.mode,
            created,
            skipped,
            failed,
        );
        Ok(())
    }

    /// Tick every `interval` until cancelled, skipping ticks while the
    /// target is disconnected.
    pub async fn start_periodic(
        self: Arc<Self>,
        cancel: CancellationToken,
        interval: Duration,
        target: Arc<dyn Store>,
    ) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !target.connected() {
                        debug!(
                            msg = "skipping reconciliation tick, target disconnected",
                            resource = %self.spec.kubernetes.resource,
                        );
                        continue;
                    }
                    self.clone().safe_reconcile(target.clone()).await;
                }
            }
        }
    }
}

/// Data source over another store's dataset, used in the provisioning role
/// where the durable store is authoritative.
pub struct StoreDataSource {
    store: Arc<dyn Store>,
    dataset: String,
    label: String,
}

impl StoreDataSource {
    pub fn new(store: Arc<dyn Store>, spec: &ResourceConfig) -> Self {
        let dataset = spec.kubernetes.dataset();
        let label = format!("{}:{}", store.kind(), dataset);
        Self {
            store,
            dataset,
            label,
        }
    }
}

#[async_trait::async_trait]
impl DataSource for StoreDataSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn list_resources(&self) -> Result<Vec<serde_json::Value>> {
        self.store.list(&self.dataset, "", 0).await
    }
}
