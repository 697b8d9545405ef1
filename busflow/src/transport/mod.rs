//! Transport-facing contracts: addresses, outgoing messages, sending and
//! deferring.
//!
//! Physical delivery is not implemented here; only the shape of the calls the
//! dispatch core makes.

use crate::context::{headers, Headers, LogicalMessage};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A transport address (queue name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Creates a new address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the address is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// A message ready to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Message identifier.
    pub message_id: String,
    /// Message headers.
    pub headers: Headers,
    /// Message body.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    /// Creates a message with a generated id and no body.
    #[must_use]
    pub fn new() -> Self {
        let message_id = Uuid::new_v4().to_string();
        let mut map = Headers::new();
        map.insert(headers::MESSAGE_ID.to_string(), message_id.clone());
        Self {
            message_id,
            headers: map,
            body: Vec::new(),
        }
    }

    /// Creates an empty control message.
    #[must_use]
    pub fn control() -> Self {
        Self::new().with_header(headers::CONTROL_MESSAGE, "true")
    }

    /// Creates the control message that redelivers a due timeout.
    ///
    /// The reply-to address is the dispatcher itself so that retries of this
    /// message come back through the timeout dispatch path.
    #[must_use]
    pub fn timeout_control(timeout_id: &str, dispatcher: &Address) -> Self {
        Self::control()
            .with_header(headers::TIMEOUT_ID, timeout_id)
            .with_header(headers::REPLY_TO_ADDRESS, dispatcher.as_str())
    }

    /// Sets a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns true if this is a control message.
    #[must_use]
    pub fn is_control_message(&self) -> bool {
        self.header(headers::CONTROL_MESSAGE) == Some("true")
    }
}

impl Default for OutgoingMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches messages to a destination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends `message` to `destination`.
    async fn send(&self, message: OutgoingMessage, destination: &Address) -> Result<()>;
}

/// Re-enqueues the message currently being processed for later delivery.
///
/// Not idempotent: every call produces another delivery.
#[async_trait]
pub trait MessageDeferrer: Send + Sync {
    /// Defers the current message.
    async fn defer(&self, message_id: &str, headers: &Headers, message: &LogicalMessage) -> Result<()>;
}
