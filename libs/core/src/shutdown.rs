//! Priority-ordered graceful teardown.
//!
//! Components register hooks during startup; after the process receives a
//! termination signal the binary drains the queue. Hooks run sequentially,
//! ascending by priority, in registration order within the same priority.

use std::future::Future;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;

type HookFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Hook {
    priority: i32,
    name: String,
    run: HookFn,
}

#[derive(Default)]
pub struct ShutdownQueue {
    hooks: Mutex<Vec<Hook>>,
}

impl ShutdownQueue {
    pub const fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F, Fut>(&self, priority: i32, name: &str, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.lock().push(Hook {
            priority,
            name: name.to_string(),
            run: Box::new(move || Box::pin(hook())),
        });
    }

    /// Drain and run all registered hooks. Hooks registered while draining
    /// run in a later call.
    pub async fn run(&self) {
        let mut hooks = std::mem::take(&mut *self.hooks.lock());
        hooks.sort_by_key(|h| h.priority);
        for hook in hooks {
            debug!(msg = "running shutdown hook", name = %hook.name, priority = hook.priority);
            (hook.run)().await;
        }
    }
}

static GLOBAL: ShutdownQueue = ShutdownQueue::new();

/// Process-wide shutdown queue used by the binary.
pub fn global() -> &'static ShutdownQueue {
    &GLOBAL
}
