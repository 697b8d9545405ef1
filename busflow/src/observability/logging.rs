//! Subscriber installation for hosts that do not bring their own.

use crate::errors::{BusflowError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Text,
    /// Multi-line human readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` wins over `filter` when set. Returns `Ok(false)` if another
/// subscriber was already installed, which is not treated as an error.
///
/// # Errors
///
/// Returns `Configuration` if `filter` is not a valid filter directive.
pub fn init_logging(filter: &str, format: LogFormat) -> Result<bool> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(filter)
            .map_err(|e| BusflowError::Configuration(format!("invalid log filter '{filter}': {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn test_second_install_is_not_an_error() {
        let _ = init_logging("debug", LogFormat::Text);
        assert!(!init_logging("debug", LogFormat::Json).unwrap());
    }
}
