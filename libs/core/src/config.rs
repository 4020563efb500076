//! Configuration schema and loading.
//!
//! Configuration is read from a YAML file and overlaid with environment
//! variables carrying the `QUASAR_` prefix, where `.` separators of the
//! config path map to `_` (e.g. `QUASAR_STORE_HAZELCAST_CLUSTERNAME`
//! overrides `store.hazelcast.clusterName`). The overlay is applied on the
//! YAML tree before deserialization so typed defaults and validation stay in
//! one place.

use crate::error::{Error, Result};
use crate::resource::{self, path_value};
use crate::telemetry::LogFormat;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_PREFIX: &str = "QUASAR_";
pub const DEFAULT_CONFIG_FILE: &str = "quasar.yaml";

/// Serde adapter for humantime duration strings (`"30s"`, `"5m"`).
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Watcher,
    Provisioning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Hazelcast,
    Mongo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackType {
    #[default]
    Mongo,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    #[default]
    Incremental,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_re_sync_period", with = "duration")]
    pub re_sync_period: Duration,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            re_sync_period: default_re_sync_period(),
            resources: Vec::new(),
            store: StoreConfig::default(),
            fallback: FallbackConfig::default(),
            watcher: WatcherConfig::default(),
            provisioning: ProvisioningConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_re_sync_period() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub store_type: StoreType,

    #[serde(default)]
    pub hazelcast: HazelcastConfig,

    #[serde(default)]
    pub mongo: MongoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastConfig {
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub write_behind: bool,

    #[serde(default)]
    pub unisocket: bool,

    #[serde(default)]
    pub reconcile_mode: ReconcileMode,

    #[serde(
        default,
        with = "option_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub reconciliation_interval: Option<Duration>,

    #[serde(default = "default_heartbeat_timeout", with = "duration")]
    pub heartbeat_timeout: Duration,

    #[serde(default = "default_connection_timeout", with = "duration")]
    pub connection_timeout: Duration,

    #[serde(default = "default_invocation_timeout", with = "duration")]
    pub invocation_timeout: Duration,

    #[serde(default)]
    pub redo_operation: bool,

    #[serde(default)]
    pub connection_strategy: ConnectionStrategy,
}

impl Default for HazelcastConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            addresses: Vec::new(),
            username: String::new(),
            password: String::new(),
            write_behind: false,
            unisocket: false,
            reconcile_mode: ReconcileMode::default(),
            reconciliation_interval: None,
            heartbeat_timeout: default_heartbeat_timeout(),
            connection_timeout: default_connection_timeout(),
            invocation_timeout: default_invocation_timeout(),
            redo_operation: false,
            connection_strategy: ConnectionStrategy::default(),
        }
    }
}

mod option_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(raw) => humantime::parse_duration(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

fn default_cluster_name() -> String {
    "dev".to_string()
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_invocation_timeout() -> Duration {
    Duration::from_secs(120)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStrategy {
    #[serde(default = "default_reconnect_mode")]
    pub reconnect_mode: String,

    #[serde(default = "default_connection_strategy_timeout", with = "duration")]
    pub timeout: Duration,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ConnectionStrategy {
    fn default() -> Self {
        Self {
            reconnect_mode: default_reconnect_mode(),
            timeout: default_connection_strategy_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_reconnect_mode() -> String {
    "async".to_string()
}

fn default_connection_strategy_timeout() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff", with = "duration")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "duration")]
    pub max_backoff: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    1.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoConfig {
    #[serde(default = "default_mongo_uri")]
    pub uri: String,

    #[serde(default = "default_mongo_database")]
    pub database: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_mongo_uri(),
            database: default_mongo_database(),
        }
    }
}

fn default_mongo_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongo_database() -> String {
    "quasar".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    #[serde(rename = "type", default)]
    pub fallback_type: FallbackType,

    #[serde(default)]
    pub mongo: MongoConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    #[serde(default)]
    pub store: RoleStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleStoreConfig {
    #[serde(default)]
    pub primary: StoreRef,

    #[serde(default = "default_secondary", skip_serializing_if = "Option::is_none")]
    pub secondary: Option<StoreRef>,
}

impl Default for RoleStoreConfig {
    fn default() -> Self {
        Self {
            primary: StoreRef::default(),
            secondary: default_secondary(),
        }
    }
}

fn default_secondary() -> Option<StoreRef> {
    Some(StoreRef {
        store_type: StoreType::Mongo,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRef {
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningConfig {
    #[serde(default = "default_provisioning_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub store: RoleStoreConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            port: default_provisioning_port(),
            log_level: None,
            security: SecurityConfig::default(),
            store: RoleStoreConfig::default(),
        }
    }
}

fn default_provisioning_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub trusted_issuers: Vec<String>,

    #[serde(default)]
    pub trusted_clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_timeout", with = "duration")]
    pub timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
            timeout: default_metrics_timeout(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    8081
}

fn default_metrics_timeout() -> Duration {
    Duration::from_secs(30)
}

/// One watched or provisioned resource kind plus its store and telemetry
/// settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    #[serde(default)]
    pub kubernetes: KubernetesResource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,

    #[serde(default)]
    pub mongo_indexes: Vec<MongoIndex>,

    #[serde(default)]
    pub hazelcast_indexes: Vec<GridIndexConfig>,

    #[serde(default)]
    pub prometheus: TelemetryConfig,
}

/// Index specification for the document store: field name to direction
/// (`1` ascending, `-1` descending); multiple entries form a compound index.
pub type MongoIndex = BTreeMap<String, i32>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResource {
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub resource: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl KubernetesResource {
    /// Dataset name for this kind: `lower("{resource}.{group}.{version}")`.
    ///
    /// Core-group resources keep the empty middle segment (`"pods..v1"`).
    pub fn dataset(&self) -> String {
        format!("{}.{}.{}", self.resource, self.group, self.version).to_lowercase()
    }

    /// `apiVersion` string as it appears on objects of this kind.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridIndexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(rename = "type", default)]
    pub index_type: GridIndexType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridIndexType {
    #[default]
    Hash,
    Sorted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Label name to value; a value with the `$.` prefix is resolved as a
    /// dotted path into the resource, anything else is taken literally.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceConfig {
    /// Derive the canonical store key for a resource of this kind.
    ///
    /// Precedence: configured `mongoId` path (only when it resolves to a
    /// string), then `metadata.uid`, then `"{namespace}/{name}"`. A
    /// `mongoId` path resolving to a non-string value is treated as absent.
    pub fn canonical_key(&self, resource: &serde_json::Value) -> Option<String> {
        if let Some(path) = &self.mongo_id {
            match path_value(resource, path) {
                Some(serde_json::Value::String(id)) => return Some(id.clone()),
                Some(other) => {
                    warn!(
                        msg = "configured id path does not resolve to a string, falling back",
                        path,
                        value_type = json_type_name(other),
                        resource = self.kubernetes.resource,
                    );
                }
                None => {}
            }
        }
        if let Some(uid) = resource::uid(resource) {
            return Some(uid.to_string());
        }
        resource::name(resource).map(|name| {
            format!("{}/{}", resource::namespace(resource).unwrap_or(""), name)
        })
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl Config {
    /// The mongo section backing the document store: the main `store` block
    /// when mongo is the configured store type, the `fallback` block
    /// otherwise.
    pub fn mongo_section(&self) -> &MongoConfig {
        if self.store.store_type == StoreType::Mongo {
            &self.store.mongo
        } else {
            &self.fallback.mongo
        }
    }

    /// Interval between periodic reconciliation passes.
    pub fn reconciliation_interval(&self) -> Duration {
        self.store
            .hazelcast
            .reconciliation_interval
            .unwrap_or(self.re_sync_period)
    }

    /// Load configuration from a YAML file, overlaying defaults and
    /// `QUASAR_` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file_value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|e| Error::ConfigError("cannot parse configuration file".to_string(), e))?;

        let mut merged = serde_yaml::to_value(Config::default())
            .map_err(|e| Error::ConfigError("cannot serialize defaults".to_string(), e))?;
        merge_value(&mut merged, file_value);
        apply_env_overrides(&mut merged, std::env::vars());

        serde_yaml::from_value(merged)
            .map_err(|e| Error::ConfigError("invalid configuration".to_string(), e))
    }

    /// Write the default configuration to `path`. Fails if the file cannot
    /// be written; existence checks are up to the caller.
    pub fn write_default(path: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(&Config::default())
            .map_err(|e| Error::ConfigError("cannot render default configuration".to_string(), e))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

/// Deep-merge `overlay` into `base`: mappings merge per key, everything else
/// is replaced.
fn merge_value(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `QUASAR_`-prefixed environment variables onto the YAML tree.
///
/// The variable name after the prefix is matched segment by segment
/// (case-insensitive) against mapping keys; values are parsed as YAML
/// scalars so booleans and numbers keep their types.
fn apply_env_overrides(
    value: &mut serde_yaml::Value,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (name, raw) in vars {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<&str> = path.split('_').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(&raw).unwrap_or(serde_yaml::Value::String(raw.clone()));
        if !apply_override(value, &segments, parsed) {
            warn!(msg = "environment override does not match any configuration key", name);
        }
    }
}

fn apply_override(node: &mut serde_yaml::Value, segments: &[&str], value: serde_yaml::Value) -> bool {
    let serde_yaml::Value::Mapping(map) = node else {
        return false;
    };
    let target = map.iter_mut().find_map(|(key, child)| {
        key.as_str()
            .filter(|k| k.eq_ignore_ascii_case(segments[0]))
            .map(|_| child)
    });
    match target {
        Some(child) if segments.len() == 1 => {
            *child = value;
            true
        }
        Some(child) => apply_override(child, &segments[1..], value),
        None => false,
    }
}
