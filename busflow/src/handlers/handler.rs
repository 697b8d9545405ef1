//! Handler trait and handler descriptors.

use crate::context::InvokeHandlerContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifies a handler type by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerType(String);

impl HandlerType {
    /// Creates a new handler type.
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

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A message handler instance.
///
/// Handlers receive the message body and their invocation context. Errors are
/// arbitrary and are wrapped into `HandlerInvocation` by the pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles the current message.
    async fn handle(&self, message: &serde_json::Value, ctx: &InvokeHandlerContext) -> anyhow::Result<()>;
}

/// Registration record for a handler eligible to process a message type.
///
/// The instance is bound by the dispatch stage right before invocation and
/// never outlives the processing of one message.
#[derive(Clone)]
pub struct MessageHandler {
    handler_type: HandlerType,
    instance: Option<Arc<dyn Handler>>,
}

impl MessageHandler {
    /// Creates an unbound descriptor.
    #[must_use]
    pub fn new(handler_type: HandlerType) -> Self {
        Self {
            handler_type,
            instance: None,
        }
    }

    /// Returns the handler type.
    #[must_use]
    pub fn handler_type(&self) -> &HandlerType {
        &self.handler_type
    }

    /// Returns the bound instance, if any.
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<dyn Handler>> {
        self.instance.as_ref()
    }

    /// Returns a copy of this descriptor bound to `instance`.
    #[must_use]
    pub fn bind(&self, instance: Arc<dyn Handler>) -> Self {
        Self {
            handler_type: self.handler_type.clone(),
            instance: Some(instance),
        }
    }
}

impl PartialEq for MessageHandler {
    fn eq(&self, other: &Self) -> bool {
        self.handler_type == other.handler_type
    }
}

impl Eq for MessageHandler {}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("handler_type", &self.handler_type)
            .field("bound", &self.instance.is_some())
            .finish()
    }
}
