use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    ConfigError(String, #[source] serde_yaml::Error),

    #[error("cannot read/write configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid duration {0:?}: {1}")]
    DurationError(String, #[source] humantime::DurationError),

    #[error("{0}: {1}")]
    FormattingError(String, #[source] std::fmt::Error),

    #[error("failed to install tracing subscriber: {0}")]
    TelemetryError(String),

    #[error("unknown resource kind {0:?}")]
    UnknownResourceKind(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
