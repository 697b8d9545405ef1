//! Timeout storage and redelivery.
//!
//! This module provides:
//! - Timeout records and the store contracts
//! - An in-memory store for tests and single-process hosts
//! - The timeout manager with push notifications
//! - The background poller and its circuit breaker

mod circuit_breaker;
mod clock;
mod config;
mod data;
mod deadline;
mod manager;
mod poller;
mod store;

pub use circuit_breaker::{
    CircuitState, CriticalErrorAction, FailureOutcome, RepeatedFailuresCircuitBreaker,
};
pub use clock::{Clock, SystemClock};
pub use config::{CircuitBreakerConfig, TimeoutPollerConfig, MAX_INTERVAL_SECS};
pub use data::{DueTimeout, TimeoutChunk, TimeoutData};
pub use deadline::PollDeadline;
pub use manager::{Subscription, TimeoutManager, TimeoutPushNotifier, TimeoutPushObserver};
pub use poller::{PollerState, TimeoutPoller, STORAGE_BREAKER_NAME};
pub use store::{InMemoryTimeoutStore, TimeoutPersister, TimeoutStore};

#[cfg(test)]
pub use store::MockTimeoutStore;
