//! Configuration for the timeout poller.

use crate::errors::{BusflowError, Result};
use crate::transport::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the retrieval cap and the breaker window, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

fn bounded_seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_INTERVAL_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

/// Circuit breaker settings for timeout storage connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trigger a critical error.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Window in seconds the failures must fall into.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    120
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Gets the window as a chrono duration, saturating at [`MAX_INTERVAL_SECS`].
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        bounded_seconds(self.window_secs)
    }
}

/// Configuration for [`TimeoutPoller`](super::TimeoutPoller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPollerConfig {
    /// Where redelivery control messages are sent.
    pub dispatcher_address: Address,
    /// Longest single sleep between deadline checks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cap on how far ahead the next retrieval may be scheduled, in seconds.
    #[serde(default = "default_max_retrieval_interval_secs")]
    pub max_retrieval_interval_secs: u64,
    /// How far back the first query of a polling run looks, in years.
    #[serde(default = "default_lookback_years")]
    pub lookback_years: u32,
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_retrieval_interval_secs() -> u64 {
    60
}

fn default_lookback_years() -> u32 {
    10
}

impl TimeoutPollerConfig {
    /// Creates a configuration with defaults for `dispatcher_address`.
    #[must_use]
    pub fn new(dispatcher_address: impl Into<Address>) -> Self {
        Self {
            dispatcher_address: dispatcher_address.into(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retrieval_interval_secs: default_max_retrieval_interval_secs(),
            lookback_years: default_lookback_years(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retrieval cap.
    #[must_use]
    pub fn with_max_retrieval_interval(mut self, interval: Duration) -> Self {
        self.max_retrieval_interval_secs = interval.as_secs();
        self
    }

    /// Sets the circuit breaker threshold and window.
    #[must_use]
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, window: Duration) -> Self {
        self.circuit_breaker = CircuitBreakerConfig {
            failure_threshold,
            window_secs: window.as_secs(),
        };
        self
    }

    /// Gets the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gets the retrieval cap as a chrono duration, saturating at [`MAX_INTERVAL_SECS`].
    #[must_use]
    pub fn max_retrieval_interval(&self) -> chrono::Duration {
        bounded_seconds(self.max_retrieval_interval_secs)
    }

    /// Checks the configuration for values the poller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher_address.is_blank() {
            return Err(BusflowError::Configuration(
                "dispatcher_address must not be empty".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(BusflowError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_retrieval_interval_secs == 0 {
            return Err(BusflowError::Configuration(
                "max_retrieval_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_retrieval_interval_secs > MAX_INTERVAL_SECS {
            return Err(BusflowError::Configuration(format!(
                "max_retrieval_interval_secs must not exceed {MAX_INTERVAL_SECS}"
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(BusflowError::Configuration(
                "circuit_breaker.failure_threshold must be greater than zero".to_string(),
            ));
        }
        if self.circuit_breaker.window_secs == 0 {
            return Err(BusflowError::Configuration(
                "circuit_breaker.window_secs must be greater than zero".to_string(),
            ));
        }
        if self.circuit_breaker.window_secs > MAX_INTERVAL_SECS {
            return Err(BusflowError::Configuration(format!(
                "circuit_breaker.window_secs must not exceed {MAX_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TimeoutPollerConfig::new("endpoint.timeoutsdispatcher");

        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_retrieval_interval(), chrono::Duration::seconds(60));
        assert_eq!(config.lookback_years, 10);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: TimeoutPollerConfig = serde_json::from_value(serde_json::json!({
            "dispatcher_address": "dispatcher",
            "circuit_breaker": { "failure_threshold": 3 }
        }))
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.window_secs, 120);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_blank_address() {
        let err = TimeoutPollerConfig::new(" ").validate().unwrap_err();
        assert!(matches!(err, BusflowError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = TimeoutPollerConfig::new("d").with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = TimeoutPollerConfig::new("d").with_circuit_breaker(0, Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_intervals() {
        let config = TimeoutPollerConfig::new("d")
            .with_circuit_breaker(5, Duration::from_secs(10_000_000_000_000_000_000));
        assert!(matches!(config.validate(), Err(BusflowError::Configuration(_))));
        assert_eq!(config.circuit_breaker.window(), chrono::Duration::seconds(7 * 24 * 60 * 60));

        let config = TimeoutPollerConfig::new("d")
            .with_max_retrieval_interval(Duration::from_secs(9_000_000_000_000));
        assert!(matches!(config.validate(), Err(BusflowError::Configuration(_))));
        assert_eq!(config.max_retrieval_interval(), chrono::Duration::days(7));

        let config = TimeoutPollerConfig::new("d")
            .with_max_retrieval_interval(Duration::from_secs(MAX_INTERVAL_SECS));
        assert!(config.validate().is_ok());
    }
}
