//! Testing utilities for busflow endpoints.
//!
//! This module provides:
//! - Recording fakes for storage, adapters, handlers, builders, senders and
//!   deferrers
//! - A scripted timeout store and a manual clock
//! - A builder for incoming message contexts

mod fixtures;
mod mocks;

pub use fixtures::{ManualClock, TestableIncomingLogicalMessageContext};
pub use mocks::{
    invocation_log, FailingHandler, HandlerAction, InvocationLog, RecordingAdapter,
    RecordingDeferrer, RecordingHandler, RecordingSender, RecordingSession, RecordingStorage,
    ScriptedTimeoutStore, StaticBuilder,
};
