//! Translation of Kubernetes watch streams into the pipeline's event shape.
//!
//! The watch stream only carries the new object state; the informer keeps a
//! per-kind cache keyed by canonical key so updates can be delivered with
//! both old and new state. A single consumer task per kind preserves the
//! per-object arrival order.

use crate::watcher::WatchEvent;

use quasar_core::config::ResourceConfig;

use std::collections::HashMap;

use futures::StreamExt;
use kube::Api;
use kube::api::DynamicObject;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event, watcher as watch_stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const INFORMER_BUFFER_SIZE: usize = 256;

/// Translate one watch event, updating the old-state cache.
///
/// A re-list after reconnect surfaces cached objects as updates, so the
/// downstream no-op check on `resourceVersion` filters unchanged state.
pub fn translate(
    cache: &mut HashMap<String, Value>,
    spec: &ResourceConfig,
    event: Event<DynamicObject>,
) -> Vec<WatchEvent> {
    match event {
        Event::Init => {
            debug!(msg = "watch (re)started", resource = %spec.kubernetes.resource);
            Vec::new()
        }
        Event::InitDone => vec![WatchEvent::Synced],
        Event::InitApply(object) | Event::Apply(object) => {
            let Some((key, new)) = object_state(spec, object) else {
                return Vec::new();
            };
            match cache.insert(key, new.clone()) {
                Some(old) => vec![WatchEvent::Update { old, new }],
                None => vec![WatchEvent::Add(new)],
            }
        }
        Event::Delete(object) => {
            let Some((key, resource)) = object_state(spec, object) else {
                return Vec::new();
            };
            cache.remove(&key);
            vec![WatchEvent::Delete(resource)]
        }
    }
}

fn object_state(spec: &ResourceConfig, object: DynamicObject) -> Option<(String, Value)> {
    let resource = match serde_json::to_value(&object) {
        Ok(resource) => resource,
        Err(e) => {
            warn!(
                msg = "dropping unserializable object",
                resource = %spec.kubernetes.resource,
                %e,
            );
            return None;
        }
    };
    match spec.canonical_key(&resource) {
        Some(key) => Some((key, resource)),
        None => {
            warn!(
                msg = "dropping object without canonical key",
                resource = %spec.kubernetes.resource,
            );
            None
        }
    }
}

/// Start the informer task for one kind and hand back its event channel.
///
/// The task ends when the stop signal fires or the receiver is dropped; the
/// join handle lets the consumer escalate an informer panic.
pub fn spawn_informer(
    api: Api<DynamicObject>,
    spec: ResourceConfig,
    cancel: CancellationToken,
) -> (mpsc::Receiver<WatchEvent>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(INFORMER_BUFFER_SIZE);
    let handle = tokio::spawn(informer_loop(api, spec, cancel, tx));
    (rx, handle)
}

async fn informer_loop(
    api: Api<DynamicObject>,
    spec: ResourceConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<WatchEvent>,
) {
    let mut cache: HashMap<String, Value> = HashMap::new();
    let mut stream = watch_stream(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    for event in translate(&mut cache, &spec, event) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    if tx.send(WatchEvent::WatchError(e.to_string())).await.is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    }
}
