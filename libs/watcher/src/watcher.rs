//! Per-kind watch pipeline.
//!
//! One [`ResourceWatcher`] consumes the event channel of one informer and
//! projects every event into the dual store. State is mutated before
//! telemetry, and a failed watch before the first sync triggers a one-shot
//! replay of the secondary store's documents into the pipeline.

use crate::error::{Error, Result};
use crate::event::spawn_informer;
use crate::replay::Replay;

use quasar_core::config::ResourceConfig;
use quasar_core::metrics::{Metrics, kind_labels, telemetry_labels};
use quasar_core::resource::{ensure_environment, name, resource_version, uid};
use quasar_store::{DataSource, DualStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kube::Api;
use kube::api::DynamicObject;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Add(Value),
    Update { old: Value, new: Value },
    Delete(Value),
    WatchError(String),
    Synced,
}

pub struct ResourceWatcher {
    spec: ResourceConfig,
    dual: Arc<DualStore>,
    replay: Option<Arc<dyn Replay>>,
    metrics: Metrics,
    cancel: CancellationToken,
    synced: AtomicBool,
    replay_consumed: AtomicBool,
}

impl ResourceWatcher {
    pub fn new(
        spec: ResourceConfig,
        dual: Arc<DualStore>,
        replay: Option<Arc<dyn Replay>>,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            dual,
            replay,
            metrics,
            cancel,
            synced: AtomicBool::new(false),
            replay_consumed: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Initialize the dataset on both stores, then run the informer until
    /// the stop signal fires. A fatal watch error or an informer panic ends
    /// the watcher with an error.
    pub async fn start(
        &self,
        api: Api<DynamicObject>,
        data_source: Arc<dyn DataSource>,
    ) -> Result<()> {
        self.dual
            .initialize_resource(Some(data_source), &self.spec)
            .await?;
        info!(
            msg = "starting resource watcher",
            group = %self.spec.kubernetes.group,
            version = %self.spec.kubernetes.version,
            resource = %self.spec.kubernetes.resource,
        );
        let (mut events, informer) =
            spawn_informer(api, self.spec.clone(), self.cancel.child_token());
        let result = self.run(&mut events).await;
        drop(events);
        if let Err(e) = informer.await {
            error!(
                msg = "informer task panicked",
                resource = %self.spec.kubernetes.resource,
                %e,
            );
            return Err(Error::InformerPanic(e.to_string()));
        }
        result
    }

    /// Consume events until the channel closes or the stop signal fires.
    pub async fn run(&self, events: &mut mpsc::Receiver<WatchEvent>) -> Result<()> {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => return Ok(()),
                }
            }
        }
    }

    pub async fn handle_event(&self, event: WatchEvent) -> Result<()> {
        match event {
            WatchEvent::Add(resource) => self.handle_add(resource).await,
            WatchEvent::Update { old, new } => self.handle_update(old, new).await,
            WatchEvent::Delete(resource) => self.handle_delete(resource).await,
            WatchEvent::Synced => {
                self.synced.store(true, Ordering::SeqCst);
                debug!(msg = "watch synced", resource = %self.spec.kubernetes.resource);
                Ok(())
            }
            WatchEvent::WatchError(message) => self.handle_watch_error(message).await,
        }
    }

    async fn handle_add(&self, mut resource: Value) -> Result<()> {
        ensure_environment(&mut resource);
        match self.dual.create(&resource).await {
            Ok(()) => {
                if self.spec.prometheus.enabled {
                    let labels =
                        telemetry_labels(&self.spec.kubernetes, &self.spec.prometheus, &resource);
                    self.metrics.resources_inc(&labels);
                }
            }
            Err(e) => self.report_store_error("create", &resource, &e),
        }
        Ok(())
    }

    async fn handle_update(&self, old: Value, mut new: Value) -> Result<()> {
        if resource_version(&old) == resource_version(&new) {
            debug!(
                msg = "unchanged resource version, skipping update",
                resource = %self.spec.kubernetes.resource,
                name = name(&new).unwrap_or_default(),
            );
            return Ok(());
        }
        ensure_environment(&mut new);
        if let Err(e) = self.dual.update(&old, &new).await {
            self.report_store_error("update", &new, &e);
        }
        Ok(())
    }

    async fn handle_delete(&self, resource: Value) -> Result<()> {
        match self.dual.delete(&resource).await {
            Ok(()) => {
                if self.spec.prometheus.enabled {
                    let labels =
                        telemetry_labels(&self.spec.kubernetes, &self.spec.prometheus, &resource);
                    self.metrics.resources_dec(&labels);
                }
            }
            Err(e) => self.report_store_error("delete", &resource, &e),
        }
        Ok(())
    }

    /// The first watch error before the informer has synced triggers a
    /// one-shot replay from the secondary store; any later error, or an
    /// error once the replay is consumed, is fatal.
    async fn handle_watch_error(&self, message: String) -> Result<()> {
        self.metrics
            .watch_operations_failed_inc(&kind_labels(&self.spec.kubernetes));
        if self.synced.load(Ordering::SeqCst) || self.replay_consumed.swap(true, Ordering::SeqCst) {
            return Err(Error::WatchFailed(message));
        }

        warn!(
            msg = "watch failed before first sync, replaying from secondary store",
            resource = %self.spec.kubernetes.resource,
            watch_error = %message,
        );
        let replay = self.replay.as_ref().ok_or(Error::NoReplaySource)?;
        let resources = replay
            .list(&self.spec.kubernetes.dataset())
            .await
            .map_err(Error::ReplayFailed)?;
        let count = resources.len();
        for mut resource in resources {
            ensure_environment(&mut resource);
            self.dual
                .create(&resource)
                .await
                .map_err(Error::ReplayFailed)?;
        }
        info!(
            msg = "replayed resources from secondary store",
            resource = %self.spec.kubernetes.resource,
            count,
        );
        Ok(())
    }

    fn report_store_error(&self, operation: &str, resource: &Value, e: &quasar_store::Error) {
        error!(
            msg = "store operation failed",
            group = %self.spec.kubernetes.group,
            version = %self.spec.kubernetes.version,
            resource = %self.spec.kubernetes.resource,
            operation,
            name = name(resource).unwrap_or_default(),
            uid = uid(resource).unwrap_or_default(),
            %e,
        );
    }
}
