mod provisioning;
mod reconnect;
mod sync;
mod watcher;
