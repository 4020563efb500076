//! Helpers for working with the dynamic JSON shape of mirrored resources.
//!
//! A resource is an opaque `serde_json::Value` tree with the conventional
//! Kubernetes fields (`apiVersion`, `kind`, `metadata`, `spec`, `status`).
//! Everything here treats the tree generically and only knows about those
//! conventional paths.

use crate::config::ResourceConfig;

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Value assigned to `spec.environment` when the field is absent.
pub const DEFAULT_ENVIRONMENT: &str = "default";

const ENVIRONMENT_PATH: &str = "spec.environment";

/// Look up a nested value by a dotted path, e.g. `metadata.labels.app`.
pub fn path_value<'a>(resource: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = resource;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a nested value by a dotted path, creating intermediate objects.
///
/// Intermediate non-object values are replaced by objects so that the full
/// path always exists afterwards.
pub fn set_path_value(resource: &mut Value, path: &str, value: Value) {
    if !resource.is_object() {
        *resource = Value::Object(Map::new());
    }
    let mut current = resource;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = current.as_object_mut().expect("object ensured above");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        let entry = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
}

fn path_str<'a>(resource: &'a Value, path: &str) -> Option<&'a str> {
    path_value(resource, path).and_then(Value::as_str)
}

pub fn api_version(resource: &Value) -> Option<&str> {
    path_str(resource, "apiVersion")
}

pub fn kind(resource: &Value) -> Option<&str> {
    path_str(resource, "kind")
}

pub fn name(resource: &Value) -> Option<&str> {
    path_str(resource, "metadata.name")
}

pub fn namespace(resource: &Value) -> Option<&str> {
    path_str(resource, "metadata.namespace")
}

pub fn uid(resource: &Value) -> Option<&str> {
    path_str(resource, "metadata.uid")
}

pub fn resource_version(resource: &Value) -> Option<&str> {
    path_str(resource, "metadata.resourceVersion")
}

pub fn creation_timestamp(resource: &Value) -> Option<&str> {
    path_str(resource, "metadata.creationTimestamp")
}

/// Default `spec.environment` to [`DEFAULT_ENVIRONMENT`] if it is absent.
///
/// Every resource written through the pipeline carries an environment; the
/// stores and downstream consumers rely on the field being present.
pub fn ensure_environment(resource: &mut Value) {
    if path_value(resource, ENVIRONMENT_PATH).is_none() {
        set_path_value(
            resource,
            ENVIRONMENT_PATH,
            Value::String(DEFAULT_ENVIRONMENT.to_string()),
        );
    }
}

/// Lookup table from resource identity to its [`ResourceConfig`].
///
/// Both store adapters resolve dataset and canonical key through the same
/// registry, which keeps key derivation consistent across stores.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    specs: Vec<ResourceConfig>,
    by_api: HashMap<(String, String), usize>,
    by_gvr: HashMap<(String, String, String), usize>,
}

impl ResourceRegistry {
    pub fn new(specs: Vec<ResourceConfig>) -> Self {
        let mut by_api = HashMap::new();
        let mut by_gvr = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            let k = &spec.kubernetes;
            by_api.insert((k.api_version(), k.kind.clone()), i);
            by_gvr.insert((k.group.clone(), k.version.clone(), k.resource.clone()), i);
        }
        Self {
            specs,
            by_api,
            by_gvr,
        }
    }

    pub fn specs(&self) -> &[ResourceConfig] {
        &self.specs
    }

    /// Resolve the configuration for a resource by its `apiVersion` + `kind`.
    pub fn for_resource(&self, resource: &Value) -> Option<&ResourceConfig> {
        let api_version = api_version(resource)?;
        let kind = kind(resource)?;
        self.by_api
            .get(&(api_version.to_string(), kind.to_string()))
            .map(|&i| &self.specs[i])
    }

    /// Resolve the configuration for a `(group, version, resource)` triple.
    pub fn for_gvr(&self, group: &str, version: &str, resource: &str) -> Option<&ResourceConfig> {
        self.by_gvr
            .get(&(group.to_string(), version.to_string(), resource.to_string()))
            .map(|&i| &self.specs[i])
    }
}
