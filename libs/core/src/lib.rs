pub mod config;
pub mod error;
pub mod metrics;
pub mod resource;
pub mod shutdown;
pub mod telemetry;

pub use error::{Error, Result};
