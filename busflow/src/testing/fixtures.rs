//! Test fixtures: a controllable clock and an incoming context builder.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::context::{ContextBag, Headers, IncomingLogicalMessageContext, LogicalMessage, MessageMetadata, MessageType};
use crate::timeout::Clock;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = *now + by;
    }

    /// Sets the clock.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Builder for [`IncomingLogicalMessageContext`] in tests.
#[derive(Debug)]
pub struct TestableIncomingLogicalMessageContext {
    message_type: MessageType,
    body: serde_json::Value,
    message_id: Option<String>,
    reply_to_address: Option<String>,
    headers: Headers,
    extensions: Arc<ContextBag>,
    handled: bool,
}

impl TestableIncomingLogicalMessageContext {
    /// Starts a context for a message of `message_type` with an empty body.
    #[must_use]
    pub fn new(message_type: impl Into<MessageType>) -> Self {
        Self {
            message_type: message_type.into(),
            body: serde_json::json!({}),
            message_id: None,
            reply_to_address: None,
            headers: Headers::new(),
            extensions: Arc::new(ContextBag::new()),
            handled: false,
        }
    }

    /// Sets the message body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Sets the message id.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the reply-to address.
    #[must_use]
    pub fn with_reply_to_address(mut self, address: impl Into<String>) -> Self {
        self.reply_to_address = Some(address.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Stores a typed value in the extension bag.
    #[must_use]
    pub fn with_extension<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.extensions.set(value);
        self
    }

    /// Marks the message as already handled.
    #[must_use]
    pub fn handled(mut self) -> Self {
        self.handled = true;
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> IncomingLogicalMessageContext {
        let message = LogicalMessage::new(MessageMetadata::new(self.message_type), self.body);
        let mut ctx = IncomingLogicalMessageContext::new(message)
            .with_headers(self.headers)
            .with_extensions(self.extensions);
        if let Some(id) = self.message_id {
            ctx = ctx.with_message_id(id);
        }
        if let Some(address) = self.reply_to_address {
            ctx = ctx.with_reply_to_address(address);
        }
        if self.handled {
            ctx.mark_handled();
        }
        ctx
    }
}
