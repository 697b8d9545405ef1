//! Handler registry mapping message types to handler descriptors.

use super::{HandlerType, MessageHandler};
use crate::context::MessageType;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Looks up the handlers registered for a message type.
pub trait HandlerRegistry: Send + Sync {
    /// Returns the handlers for `message_type` in registration order.
    ///
    /// The result is deduplicated and empty when nothing is registered.
    fn handlers_for(&self, message_type: &MessageType) -> Vec<MessageHandler>;
}

/// In-memory handler registry.
#[derive(Debug, Default)]
pub struct MessageHandlerRegistry {
    handlers: RwLock<HashMap<MessageType, Vec<HandlerType>>>,
}

impl MessageHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler_type` for `message_type`.
    ///
    /// Registering the same pair twice has no effect.
    pub fn register(&self, message_type: impl Into<MessageType>, handler_type: impl Into<HandlerType>) {
        let handler_type = handler_type.into();
        let mut handlers = self.handlers.write();
        let entry = handlers.entry(message_type.into()).or_default();

        if !entry.contains(&handler_type) {
            entry.push(handler_type);
        }
    }

    /// Registers `handler_type` for `message_type`, builder style.
    #[must_use]
    pub fn with_handler(self, message_type: impl Into<MessageType>, handler_type: impl Into<HandlerType>) -> Self {
        self.register(message_type, handler_type);
        self
    }

    /// Returns every message type with at least one handler.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl HandlerRegistry for MessageHandlerRegistry {
    fn handlers_for(&self, message_type: &MessageType) -> Vec<MessageHandler> {
        self.handlers
            .read()
            .get(message_type)
            .map(|types| types.iter().cloned().map(MessageHandler::new).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(handlers: &[MessageHandler]) -> Vec<String> {
        handlers
            .iter()
            .map(|h| h.handler_type().name().to_string())
            .collect()
    }

    #[test]
    fn test_empty_registry() {
        let registry = MessageHandlerRegistry::new();
        assert!(registry.handlers_for(&MessageType::new("Order")).is_empty());
    }

    #[test]
    fn test_registration_order_is_stable() {
        let registry = MessageHandlerRegistry::new()
            .with_handler("Invoice", "H2")
            .with_handler("Invoice", "H1")
            .with_handler("Invoice", "H3");

        assert_eq!(
            names(&registry.handlers_for(&MessageType::new("Invoice"))),
            vec!["H2", "H1", "H3"]
        );
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let registry = MessageHandlerRegistry::new()
            .with_handler("Invoice", "H1")
            .with_handler("Invoice", "H1");

        assert_eq!(registry.handlers_for(&MessageType::new("Invoice")).len(), 1);
    }

    #[test]
    fn test_descriptors_are_unbound() {
        let registry = MessageHandlerRegistry::new().with_handler("Invoice", "H1");

        let handlers = registry.handlers_for(&MessageType::new("Invoice"));
        assert!(handlers[0].instance().is_none());
        assert_eq!(registry.message_types(), vec![MessageType::new("Invoice")]);
    }
}
