//! Handler invocation span.

use crate::context::{BehaviorContext, InvokeHandlerContext};
use crate::errors::Result;
use crate::pipeline::{Behavior, Next};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Wraps each handler invocation in a `handle_message` span.
///
/// The span carries the message id, message type and handler type. Failures
/// are logged at warn level and passed on unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBehavior;

impl LoggingBehavior {
    /// Creates the behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Behavior<InvokeHandlerContext> for LoggingBehavior {
    async fn invoke(&self, ctx: &InvokeHandlerContext, next: Next<'_, InvokeHandlerContext>) -> Result<()> {
        let span = info_span!(
            "handle_message",
            message_id = %ctx.message_id(),
            message_type = %ctx.message().message_type(),
            handler = %ctx.message_handler().handler_type(),
        );

        async move {
            let started = Instant::now();
            let result = next.run(ctx).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(()) => debug!(
                    duration_ms,
                    aborted = ctx.is_invocation_aborted(),
                    deferred = ctx.defer_called(),
                    "Handler completed"
                ),
                Err(e) => warn!(duration_ms, error = %e, kind = e.kind(), "Handler failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
