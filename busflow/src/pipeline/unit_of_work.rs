//! Unit-of-work stage: handler lookup and storage session lifecycle.

use super::{Continuation, StageConnector};
use crate::context::{
    BehaviorContext, ContextBag, IncomingLogicalMessageContext, IncomingUnitOfWorkContext,
};
use crate::errors::{BusflowError, Result};
use crate::handlers::HandlerRegistry;
use crate::persistence::{
    AmbientTransaction, CompletableSynchronizedStorageSession, OutboxTransaction, SessionScope,
    SynchronizedStorage, SynchronizedStorageAdapter, TransportTransaction,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Opens one storage session per message and commits it after all handlers.
///
/// The session is adapted from the outbox transaction if one is present in
/// the extension bag, else from the transport transaction, else opened fresh.
/// It is committed only when the whole downstream chain succeeds and is
/// released on every exit path.
pub struct UnitOfWorkConnector {
    registry: Arc<dyn HandlerRegistry>,
    storage: Arc<dyn SynchronizedStorage>,
    adapter: Arc<dyn SynchronizedStorageAdapter>,
}

impl UnitOfWorkConnector {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        registry: Arc<dyn HandlerRegistry>,
        storage: Arc<dyn SynchronizedStorage>,
        adapter: Arc<dyn SynchronizedStorageAdapter>,
    ) -> Self {
        Self {
            registry,
            storage,
            adapter,
        }
    }

    async fn acquire_session(
        &self,
        extensions: &ContextBag,
    ) -> Result<Arc<dyn CompletableSynchronizedStorageSession>> {
        if let Some(outbox) = extensions.get::<OutboxTransaction>() {
            if let Some(session) = self
                .adapt(AmbientTransaction::Outbox(&outbox), extensions)
                .await?
            {
                return Ok(session);
            }
        }

        if let Some(transport) = extensions.get::<TransportTransaction>() {
            if let Some(session) = self
                .adapt(AmbientTransaction::Transport(&transport), extensions)
                .await?
            {
                return Ok(session);
            }
        }

        debug!("Opening new storage session");
        self.storage
            .open_session(extensions)
            .await
            .map_err(|e| match e {
                BusflowError::SessionOpen(_) => e,
                other => BusflowError::SessionOpen(other.to_string()),
            })
    }

    async fn adapt(
        &self,
        transaction: AmbientTransaction<'_>,
        extensions: &ContextBag,
    ) -> Result<Option<Arc<dyn CompletableSynchronizedStorageSession>>> {
        let adapted = self
            .adapter
            .try_adapt(transaction, extensions)
            .await
            .map_err(|e| match e {
                BusflowError::StorageAdaptation(_) => e,
                other => BusflowError::StorageAdaptation(other.to_string()),
            })?;

        if adapted.is_some() {
            debug!(transaction = transaction.kind(), "Adapted storage session");
        }
        Ok(adapted)
    }
}

#[async_trait]
impl StageConnector<IncomingLogicalMessageContext, IncomingUnitOfWorkContext> for UnitOfWorkConnector {
    async fn invoke(
        &self,
        ctx: &IncomingLogicalMessageContext,
        next: &dyn Continuation<IncomingUnitOfWorkContext>,
    ) -> Result<()> {
        let message_type = ctx.message().message_type();
        let handlers = self.registry.handlers_for(message_type);

        if !ctx.is_message_handled() && handlers.is_empty() {
            return Err(BusflowError::no_handlers(message_type.name()));
        }

        let mut scope = SessionScope::new(self.acquire_session(ctx.extensions()).await?);
        let uow = IncomingUnitOfWorkContext::new(handlers, scope.handle(), ctx);

        next.proceed(&uow).await?;

        ctx.mark_handled();
        scope.complete().await?;

        debug!(
            message_id = %ctx.message_id(),
            message_type = %message_type,
            "Unit of work committed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for UnitOfWorkConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkConnector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::MessageHandlerRegistry;
    use crate::testing::{RecordingAdapter, RecordingSession, RecordingStorage, TestableIncomingLogicalMessageContext};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingNext {
        handlers: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Continuation<IncomingUnitOfWorkContext> for CapturingNext {
        async fn proceed(&self, ctx: &IncomingUnitOfWorkContext) -> Result<()> {
            self.handlers.lock().extend(
                ctx.handlers_to_invoke()
                    .iter()
                    .map(|h| h.handler_type().name().to_string()),
            );
            if self.fail {
                return Err(BusflowError::Internal("downstream failed".to_string()));
            }
            Ok(())
        }
    }

    fn registry() -> Arc<MessageHandlerRegistry> {
        Arc::new(
            MessageHandlerRegistry::new()
                .with_handler("Invoice", "H1")
                .with_handler("Invoice", "H2"),
        )
    }

    #[tokio::test]
    async fn test_no_handlers_fails_before_opening_session() {
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), Arc::new(RecordingAdapter::new()));
        let ctx = TestableIncomingLogicalMessageContext::new("Order").build();
        let next = CapturingNext::default();

        let err = stage.invoke(&ctx, &next).await.unwrap_err();

        assert!(matches!(err, BusflowError::NoHandlersFound { ref message_type } if message_type == "Order"));
        assert!(err.to_string().contains("Order"));
        assert_eq!(storage.open_count(), 0);
        assert!(next.handlers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handled_message_without_handlers_still_commits() {
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), Arc::new(RecordingAdapter::new()));
        let ctx = TestableIncomingLogicalMessageContext::new("Order").handled().build();

        stage.invoke(&ctx, &CapturingNext::default()).await.unwrap();

        let sessions = storage.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].complete_count(), 1);
    }

    #[tokio::test]
    async fn test_success_marks_handled_commits_and_releases() {
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), Arc::new(RecordingAdapter::new()));
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice").build();
        let next = CapturingNext::default();

        stage.invoke(&ctx, &next).await.unwrap();

        assert!(ctx.is_message_handled());
        assert_eq!(*next.handlers.lock(), vec!["H1", "H2"]);
        let sessions = storage.sessions();
        let session = &sessions[0];
        assert_eq!(session.complete_count(), 1);
        assert_eq!(session.release_count(), 1);
    }

    #[tokio::test]
    async fn test_downstream_failure_releases_without_commit() {
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), Arc::new(RecordingAdapter::new()));
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice").build();
        let next = CapturingNext {
            fail: true,
            ..CapturingNext::default()
        };

        assert!(stage.invoke(&ctx, &next).await.is_err());

        assert!(!ctx.is_message_handled());
        let sessions = storage.sessions();
        let session = &sessions[0];
        assert_eq!(session.complete_count(), 0);
        assert_eq!(session.release_count(), 1);
    }

    #[tokio::test]
    async fn test_outbox_takes_priority_over_transport() {
        let outbox_session = Arc::new(RecordingSession::new("outbox"));
        let transport_session = Arc::new(RecordingSession::new("transport"));
        let adapter = Arc::new(
            RecordingAdapter::new()
                .adapting("outbox", outbox_session.clone())
                .adapting("transport", transport_session.clone()),
        );
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), adapter.clone());
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice")
            .with_extension(OutboxTransaction::new())
            .with_extension(TransportTransaction::new())
            .build();

        stage.invoke(&ctx, &CapturingNext::default()).await.unwrap();

        assert_eq!(adapter.attempts(), vec!["outbox"]);
        assert_eq!(outbox_session.complete_count(), 1);
        assert_eq!(transport_session.complete_count(), 0);
        assert_eq!(storage.open_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_transport_then_open() {
        let transport_session = Arc::new(RecordingSession::new("transport"));
        let adapter = Arc::new(RecordingAdapter::new().adapting("transport", transport_session.clone()));
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), adapter.clone());
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice")
            .with_extension(OutboxTransaction::new())
            .with_extension(TransportTransaction::new())
            .build();

        stage.invoke(&ctx, &CapturingNext::default()).await.unwrap();

        assert_eq!(adapter.attempts(), vec!["outbox", "transport"]);
        assert_eq!(transport_session.complete_count(), 1);
        assert_eq!(storage.open_count(), 0);
    }

    #[tokio::test]
    async fn test_adapter_failure_propagates() {
        let adapter = Arc::new(RecordingAdapter::new().failing("lost connection"));
        let storage = Arc::new(RecordingStorage::new());
        let stage = UnitOfWorkConnector::new(registry(), storage.clone(), adapter);
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice")
            .with_extension(TransportTransaction::new())
            .build();

        let err = stage.invoke(&ctx, &CapturingNext::default()).await.unwrap_err();

        assert!(matches!(err, BusflowError::StorageAdaptation(_)));
        assert_eq!(storage.open_count(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let stage = UnitOfWorkConnector::new(
            registry(),
            Arc::new(RecordingStorage::failing("db down")),
            Arc::new(RecordingAdapter::new()),
        );
        let ctx = TestableIncomingLogicalMessageContext::new("Invoice").build();
        let next = CapturingNext::default();

        let err = stage.invoke(&ctx, &next).await.unwrap_err();

        assert!(matches!(err, BusflowError::SessionOpen(_)));
        assert!(next.handlers.lock().is_empty());
    }
}
