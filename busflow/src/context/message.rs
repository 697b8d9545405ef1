//! Logical message model shared by the incoming pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Message headers.
pub type Headers = HashMap<String, String>;

/// Well-known header names.
pub mod headers {
    /// Identifier of the timeout a control message redelivers.
    pub const TIMEOUT_ID: &str = "Timeout.Id";
    /// Marks a message as an internal control message.
    pub const CONTROL_MESSAGE: &str = "Busflow.ControlMessage";
    /// Address replies and retries should be sent to.
    pub const REPLY_TO_ADDRESS: &str = "Busflow.ReplyToAddress";
    /// Identifier of the message.
    pub const MESSAGE_ID: &str = "Busflow.MessageId";
}

/// Identifies a message type by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageType(String);

impl MessageType {
    /// Creates a new message type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Type information about a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The concrete message type.
    pub message_type: MessageType,
}

impl MessageMetadata {
    /// Creates metadata for a message type.
    #[must_use]
    pub fn new(message_type: impl Into<MessageType>) -> Self {
        Self {
            message_type: message_type.into(),
        }
    }
}

/// A deserialized message together with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    /// Type information.
    pub metadata: MessageMetadata,
    /// The message body.
    pub instance: serde_json::Value,
}

impl LogicalMessage {
    /// Creates a new logical message.
    #[must_use]
    pub fn new(metadata: MessageMetadata, instance: serde_json::Value) -> Self {
        Self { metadata, instance }
    }

    /// Returns the concrete message type.
    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.metadata.message_type
    }
}

impl Default for LogicalMessage {
    fn default() -> Self {
        Self::new(MessageMetadata::new("object"), serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_display() {
        let ty = MessageType::new("Sales.Order");
        assert_eq!(ty.to_string(), "Sales.Order");
        assert_eq!(ty.name(), "Sales.Order");
    }

    #[test]
    fn test_logical_message_serde() {
        let msg = LogicalMessage::new(MessageMetadata::new("Order"), serde_json::json!({"id": 1}));
        let json = serde_json::to_string(&msg).unwrap();
        let back: LogicalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_type().name(), "Order");
    }
}
