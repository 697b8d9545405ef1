//! Error types for the busflow dispatch core.
//!
//! Pipeline errors surface as failed message processing and are left to the
//! transport's retry policy. Poller errors are recovered locally and fed to
//! the circuit breaker; only [`BusflowError::Critical`] is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BusflowError>;

/// The main error type for busflow operations.
#[derive(Debug, Error)]
pub enum BusflowError {
    /// No handler is registered for the incoming message type.
    #[error("No handlers could be found for message type: {message_type}")]
    NoHandlersFound {
        /// Name of the message type that had no handlers.
        message_type: String,
    },

    /// Adapting a storage session from an ambient transaction failed.
    #[error("Storage adaptation failed: {0}")]
    StorageAdaptation(String),

    /// Opening a fresh storage session failed.
    #[error("Failed to open storage session: {0}")]
    SessionOpen(String),

    /// Committing the storage session failed.
    #[error("Failed to commit storage session: {0}")]
    SessionCommit(String),

    /// The builder could not produce a handler instance.
    #[error("Failed to build handler '{handler_type}': {reason}")]
    HandlerBuild {
        /// The handler type that could not be built.
        handler_type: String,
        /// Why the build failed.
        reason: String,
    },

    /// A handler returned an error.
    #[error("Handler '{handler_type}' failed: {source}")]
    HandlerInvocation {
        /// The handler type that failed.
        handler_type: String,
        /// The handler's own error.
        #[source]
        source: anyhow::Error,
    },

    /// Re-enqueueing the current message for later delivery failed.
    #[error("Failed to defer message: {0}")]
    Defer(String),

    /// The timeout store could not be reached or returned an error.
    #[error("Timeout storage connectivity failure: {0}")]
    StorageConnectivity(String),

    /// Dispatching a control message failed.
    #[error("Failed to send message to '{destination}': {reason}")]
    Send {
        /// Destination address of the failed send.
        destination: String,
        /// Why the send failed.
        reason: String,
    },

    /// An unrecoverable failure that should terminate the endpoint.
    #[error("{0}")]
    Critical(#[from] CriticalError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BusflowError {
    /// Creates a `NoHandlersFound` error.
    pub fn no_handlers(message_type: impl Into<String>) -> Self {
        Self::NoHandlersFound {
            message_type: message_type.into(),
        }
    }

    /// Creates a `HandlerBuild` error.
    pub fn handler_build(handler_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerBuild {
            handler_type: handler_type.into(),
            reason: reason.into(),
        }
    }

    /// Wraps a handler's error.
    pub fn handler_invocation(handler_type: impl Into<String>, source: anyhow::Error) -> Self {
        Self::HandlerInvocation {
            handler_type: handler_type.into(),
            source,
        }
    }

    /// Creates a `Send` error.
    pub fn send(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Send {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the poller recovers from this error on its own.
    ///
    /// Everything else propagates to the caller.
    #[must_use]
    pub fn is_retryable_locally(&self) -> bool {
        matches!(self, Self::StorageConnectivity(_) | Self::Send { .. })
    }

    /// Returns a short machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoHandlersFound { .. } => "NoHandlersFound",
            Self::StorageAdaptation(_) => "StorageAdaptationFailure",
            Self::SessionOpen(_) => "SessionOpenFailure",
            Self::SessionCommit(_) => "SessionCommitFailure",
            Self::HandlerBuild { .. } => "HandlerBuildFailure",
            Self::HandlerInvocation { .. } => "HandlerInvocationFailure",
            Self::Defer(_) => "DeferFailure",
            Self::StorageConnectivity(_) => "StorageConnectivityFailure",
            Self::Send { .. } => "SendFailure",
            Self::Critical(_) => "CriticalFailure",
            Self::Configuration(_) => "ConfigurationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::NoHandlersFound { message_type } => {
                map.insert("message_type".to_string(), serde_json::json!(message_type));
            }
            Self::HandlerBuild { handler_type, .. } | Self::HandlerInvocation { handler_type, .. } => {
                map.insert("handler_type".to_string(), serde_json::json!(handler_type));
            }
            Self::Send { destination, .. } => {
                map.insert("destination".to_string(), serde_json::json!(destination));
            }
            _ => {}
        }

        map
    }
}

/// Payload raised to the hosting process when an endpoint must terminate.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Critical error: {message}")]
pub struct CriticalError {
    /// Human-readable description of the condition.
    pub message: String,
    /// Description of the last failure that led to the escalation.
    pub last_failure: Option<String>,
    /// When the escalation happened.
    pub raised_at: DateTime<Utc>,
}

impl CriticalError {
    /// Creates a new critical error.
    #[must_use]
    pub fn new(message: impl Into<String>, raised_at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            last_failure: None,
            raised_at,
        }
    }

    /// Attaches the last observed failure.
    #[must_use]
    pub fn with_last_failure(mut self, failure: impl Into<String>) -> Self {
        self.last_failure = Some(failure.into());
        self
    }
}
