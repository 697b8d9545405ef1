//! Terminal step that executes the bound handler.

use super::Continuation;
use crate::context::InvokeHandlerContext;
use crate::errors::{BusflowError, Result};
use async_trait::async_trait;

/// Calls the handler instance bound to the invocation context.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvokeHandlerTerminator;

impl InvokeHandlerTerminator {
    /// Creates the terminator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Continuation<InvokeHandlerContext> for InvokeHandlerTerminator {
    async fn proceed(&self, ctx: &InvokeHandlerContext) -> Result<()> {
        let handler = ctx.message_handler();
        let Some(instance) = handler.instance() else {
            return Err(BusflowError::Internal(format!(
                "handler '{}' reached invocation without an instance",
                handler.handler_type()
            )));
        };

        instance
            .handle(ctx.message_being_handled(), ctx)
            .await
            .map_err(|e| BusflowError::handler_invocation(handler.handler_type().name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IncomingUnitOfWorkContext;
    use crate::handlers::{HandlerType, MessageHandler};
    use crate::persistence::SessionScope;
    use crate::testing::{FailingHandler, RecordingDeferrer, RecordingHandler, RecordingSession, TestableIncomingLogicalMessageContext};
    use std::sync::Arc;

    fn invoke_ctx(handler: MessageHandler) -> (SessionScope, InvokeHandlerContext) {
        let parent = TestableIncomingLogicalMessageContext::new("Invoice").build();
        let scope = SessionScope::new(Arc::new(RecordingSession::new("s")));
        let uow = IncomingUnitOfWorkContext::new(vec![handler.clone()], scope.handle(), &parent);
        let ctx = InvokeHandlerContext::new(handler, Arc::new(RecordingDeferrer::new()), &uow);
        (scope, ctx)
    }

    #[tokio::test]
    async fn test_calls_bound_instance() {
        let instance = Arc::new(RecordingHandler::new("H1"));
        let handler = MessageHandler::new(HandlerType::new("H1")).bind(instance.clone());
        let (_scope, ctx) = invoke_ctx(handler);

        InvokeHandlerTerminator::new().proceed(&ctx).await.unwrap();
        assert_eq!(instance.call_count(), 1);
    }

    #[tokio::test]
    async fn test_wraps_handler_error() {
        let handler = MessageHandler::new(HandlerType::new("H1")).bind(Arc::new(FailingHandler::new("boom")));
        let (_scope, ctx) = invoke_ctx(handler);

        let err = InvokeHandlerTerminator::new().proceed(&ctx).await.unwrap_err();

        assert!(matches!(err, BusflowError::HandlerInvocation { ref handler_type, .. } if handler_type == "H1"));
    }

    #[tokio::test]
    async fn test_unbound_handler_is_internal_error() {
        let (_scope, ctx) = invoke_ctx(MessageHandler::new(HandlerType::new("H1")));

        let err = InvokeHandlerTerminator::new().proceed(&ctx).await.unwrap_err();
        assert!(matches!(err, BusflowError::Internal(_)));
    }
}
