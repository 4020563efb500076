use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global tracing subscriber.
///
/// `filter` is a `tracing_subscriber::filter::EnvFilter` directive, e.g.
/// `"info,kube=debug,quasar=debug"`.
pub fn init(filter: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init(),
    };
    result.map_err(|e| Error::TelemetryError(e.to_string()))
}
