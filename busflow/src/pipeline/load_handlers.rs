//! Handler dispatch stage.

use super::{Continuation, StageConnector};
use crate::context::{BehaviorContext, IncomingUnitOfWorkContext, InvokeHandlerContext};
use crate::errors::Result;
use crate::handlers::Builder;
use crate::transport::MessageDeferrer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Builds and invokes each handler of the unit of work, one at a time.
///
/// A fresh instance is built right before each invocation. Iteration stops
/// after the first handler that aborts dispatch; the unit of work is not
/// failed by that.
pub struct LoadHandlersConnector {
    builder: Arc<dyn Builder>,
    deferrer: Arc<dyn MessageDeferrer>,
}

impl LoadHandlersConnector {
    /// Creates the stage.
    #[must_use]
    pub fn new(builder: Arc<dyn Builder>, deferrer: Arc<dyn MessageDeferrer>) -> Self {
        Self { builder, deferrer }
    }
}

#[async_trait]
impl StageConnector<IncomingUnitOfWorkContext, InvokeHandlerContext> for LoadHandlersConnector {
    async fn invoke(
        &self,
        ctx: &IncomingUnitOfWorkContext,
        next: &dyn Continuation<InvokeHandlerContext>,
    ) -> Result<()> {
        for descriptor in ctx.handlers_to_invoke() {
            let instance = self.builder.build(descriptor.handler_type())?;
            let handler_ctx =
                InvokeHandlerContext::new(descriptor.bind(instance), self.deferrer.clone(), ctx);

            next.proceed(&handler_ctx).await?;

            if handler_ctx.is_invocation_aborted() {
                debug!(
                    message_id = %ctx.message_id(),
                    handler = %descriptor.handler_type(),
                    "Dispatch stopped, skipping remaining handlers"
                );
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoadHandlersConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandlersConnector").finish_non_exhaustive()
    }
}
