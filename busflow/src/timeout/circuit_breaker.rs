//! Repeated-failures circuit breaker.
//!
//! This is a detector, not a limiter: it never blocks calls. It counts
//! consecutive failures inside a time window and raises a critical error the
//! first time the threshold is reached. Once tripped it stays tripped for the
//! life of the process.

use crate::errors::CriticalError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Callback invoked when an endpoint must terminate.
pub type CriticalErrorAction = Arc<dyn Fn(CriticalError) + Send + Sync>;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// No failures since the last success.
    Closed,
    /// Failures are accumulating inside the current window.
    Accumulating {
        /// Consecutive failures in the window.
        failures: u32,
        /// When the window started.
        window_start: DateTime<Utc>,
    },
    /// The critical callback has fired.
    Tripped,
}

/// What a single failure report did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still below the threshold.
    Recorded {
        /// Consecutive failures in the window.
        failures: u32,
    },
    /// This failure reached the threshold; the callback fired.
    Tripped,
    /// The breaker had already tripped earlier.
    AlreadyTripped,
}

/// Circuit breaker that escalates N failures within a window.
pub struct RepeatedFailuresCircuitBreaker {
    name: String,
    failure_threshold: u32,
    window: Duration,
    on_trip: CriticalErrorAction,
    state: Mutex<CircuitState>,
}

impl RepeatedFailuresCircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        window: Duration,
        on_trip: CriticalErrorAction,
    ) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold,
            window_secs = window.num_seconds(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            window,
            on_trip,
            state: Mutex::new(CircuitState::Closed),
        }
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    /// Returns true once the critical callback has fired.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        matches!(self.state(), CircuitState::Tripped)
    }

    /// Reports a successful operation.
    pub fn success(&self) {
        let mut state = self.state.lock();
        if let CircuitState::Accumulating { failures, .. } = *state {
            info!(component = %self.name, failures, "Circuit breaker recovered");
            *state = CircuitState::Closed;
        }
    }

    /// Reports a failed operation observed at `now`.
    pub fn failure(&self, failure: &str, now: DateTime<Utc>) -> FailureOutcome {
        let outcome = {
            let mut state = self.state.lock();
            let (failures, window_start) = match *state {
                CircuitState::Tripped => return FailureOutcome::AlreadyTripped,
                CircuitState::Accumulating {
                    failures,
                    window_start,
                } if now - window_start <= self.window => (failures + 1, window_start),
                _ => (1, now),
            };

            if failures >= self.failure_threshold {
                *state = CircuitState::Tripped;
                FailureOutcome::Tripped
            } else {
                *state = CircuitState::Accumulating {
                    failures,
                    window_start,
                };
                FailureOutcome::Recorded { failures }
            }
        };

        match outcome {
            FailureOutcome::Recorded { failures } => {
                warn!(component = %self.name, failures, failure, "Circuit breaker recorded failure");
            }
            FailureOutcome::Tripped => {
                error!(component = %self.name, failure, "Circuit breaker tripped");
                self.raise(failure, now);
            }
            FailureOutcome::AlreadyTripped => {}
        }

        outcome
    }

    fn raise(&self, failure: &str, now: DateTime<Utc>) {
        let critical = CriticalError::new(
            format!(
                "Repeated failures detected by '{}', endpoint will be terminated.",
                self.name
            ),
            now,
        )
        .with_last_failure(failure);

        let callback = self.on_trip.clone();
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(critical))) {
            warn!(component = %self.name, "Critical error callback panicked: {:?}", e);
        }
    }
}

impl std::fmt::Debug for RepeatedFailuresCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedFailuresCircuitBreaker")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("window", &self.window)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, window: Duration) -> (Arc<AtomicUsize>, RepeatedFailuresCircuitBreaker) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let breaker = RepeatedFailuresCircuitBreaker::new(
            "TimeoutStorageConnectivity",
            threshold,
            window,
            Arc::new(move |_: CriticalError| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (fired, breaker)
    }

    #[test]
    fn test_trips_once_at_threshold() {
        let (fired, breaker) = breaker(5, Duration::minutes(2));
        let now = Utc::now();

        for i in 0..4 {
            assert_eq!(
                breaker.failure("down", now + Duration::seconds(i)),
                FailureOutcome::Recorded { failures: u32::try_from(i + 1).unwrap() }
            );
        }
        assert_eq!(breaker.failure("down", now + Duration::seconds(4)), FailureOutcome::Tripped);
        assert_eq!(breaker.failure("down", now + Duration::seconds(5)), FailureOutcome::AlreadyTripped);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(breaker.is_tripped());
    }

    #[test]
    fn test_success_resets_accumulation() {
        let (fired, breaker) = breaker(3, Duration::minutes(2));
        let now = Utc::now();

        breaker.failure("down", now);
        breaker.failure("down", now);
        breaker.success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.failure("down", now);
        breaker.failure("down", now);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failures_outside_window_start_a_new_window() {
        let (fired, breaker) = breaker(3, Duration::seconds(10));
        let now = Utc::now();

        breaker.failure("down", now);
        breaker.failure("down", now + Duration::seconds(5));
        assert_eq!(
            breaker.failure("down", now + Duration::seconds(30)),
            FailureOutcome::Recorded { failures: 1 }
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_success_does_not_reset_tripped() {
        let (_fired, breaker) = breaker(1, Duration::seconds(10));
        breaker.failure("down", Utc::now());
        breaker.success();
        assert!(breaker.is_tripped());
    }

    #[test]
    fn test_callback_receives_last_failure() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let breaker = RepeatedFailuresCircuitBreaker::new(
            "TimeoutStorageConnectivity",
            1,
            Duration::seconds(10),
            Arc::new(move |e: CriticalError| {
                *s.lock() = Some(e);
            }),
        );

        breaker.failure("connection refused", Utc::now());

        let critical = seen.lock().clone().unwrap();
        assert_eq!(critical.last_failure.as_deref(), Some("connection refused"));
        assert!(critical.message.contains("endpoint will be terminated"));
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let breaker = RepeatedFailuresCircuitBreaker::new(
            "TimeoutStorageConnectivity",
            1,
            Duration::seconds(10),
            Arc::new(|_: CriticalError| panic!("host exploded")),
        );

        assert_eq!(breaker.failure("down", Utc::now()), FailureOutcome::Tripped);
    }
}
