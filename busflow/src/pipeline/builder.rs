//! Builder for the incoming message pipeline.

use super::{
    Behavior, BehaviorChain, Connected, Continuation, InvokeHandlerTerminator,
    LoadHandlersConnector, UnitOfWorkConnector,
};
use crate::context::{
    IncomingLogicalMessageContext, IncomingUnitOfWorkContext, InvokeHandlerContext,
};
use crate::errors::{BusflowError, Result};
use crate::handlers::{Builder, HandlerRegistry};
use crate::persistence::{SynchronizedStorage, SynchronizedStorageAdapter};
use crate::transport::MessageDeferrer;
use std::sync::Arc;

/// Composes the unit-of-work stage, the dispatch stage, the handler
/// behaviors and the terminator into one pipeline.
#[derive(Default)]
pub struct IncomingPipelineBuilder {
    registry: Option<Arc<dyn HandlerRegistry>>,
    storage: Option<Arc<dyn SynchronizedStorage>>,
    adapter: Option<Arc<dyn SynchronizedStorageAdapter>>,
    builder: Option<Arc<dyn Builder>>,
    deferrer: Option<Arc<dyn MessageDeferrer>>,
    behaviors: Vec<Arc<dyn Behavior<InvokeHandlerContext>>>,
}

impl IncomingPipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the storage backend.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn SynchronizedStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the storage adapter for ambient transactions.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn SynchronizedStorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Sets the handler instance builder.
    #[must_use]
    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Sets the deferrer used by `defer_message_to_later`.
    #[must_use]
    pub fn with_deferrer(mut self, deferrer: Arc<dyn MessageDeferrer>) -> Self {
        self.deferrer = Some(deferrer);
        self
    }

    /// Appends a behavior around every handler invocation.
    #[must_use]
    pub fn with_behavior(mut self, behavior: Arc<dyn Behavior<InvokeHandlerContext>>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the first missing collaborator.
    pub fn build(self) -> Result<IncomingPipeline> {
        let registry = required(self.registry, "handler registry")?;
        let storage = required(self.storage, "synchronized storage")?;
        let adapter = required(self.adapter, "storage adapter")?;
        let builder = required(self.builder, "handler builder")?;
        let deferrer = required(self.deferrer, "message deferrer")?;

        let behaviors = self.behaviors.len();
        let invoke = self
            .behaviors
            .into_iter()
            .fold(BehaviorChain::new(InvokeHandlerTerminator::new()), BehaviorChain::with_behavior);

        let dispatch: Connected<_, _, InvokeHandlerContext> =
            Connected::new(LoadHandlersConnector::new(builder, deferrer), invoke);
        let root: Connected<_, _, IncomingUnitOfWorkContext> =
            Connected::new(UnitOfWorkConnector::new(registry, storage, adapter), dispatch);

        Ok(IncomingPipeline {
            root: Arc::new(root),
            behaviors,
        })
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
    value.ok_or_else(|| BusflowError::Configuration(format!("incoming pipeline requires a {name}")))
}

impl std::fmt::Debug for IncomingPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingPipelineBuilder")
            .field("registry", &self.registry.is_some())
            .field("storage", &self.storage.is_some())
            .field("adapter", &self.adapter.is_some())
            .field("builder", &self.builder.is_some())
            .field("deferrer", &self.deferrer.is_some())
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}

/// A built incoming pipeline. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct IncomingPipeline {
    root: Arc<dyn Continuation<IncomingLogicalMessageContext>>,
    behaviors: usize,
}

impl IncomingPipeline {
    /// Processes one incoming message.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any stage or handler. The storage
    /// session has been released without commit by then.
    pub async fn invoke(&self, ctx: &IncomingLogicalMessageContext) -> Result<()> {
        self.root.proceed(ctx).await
    }
}

impl std::fmt::Debug for IncomingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingPipeline")
            .field("behaviors", &self.behaviors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::MessageHandlerRegistry;
    use crate::testing::{RecordingAdapter, RecordingDeferrer, RecordingStorage, StaticBuilder};

    #[test]
    fn test_missing_collaborator_is_configuration_error() {
        let err = IncomingPipelineBuilder::new()
            .with_registry(Arc::new(MessageHandlerRegistry::new()))
            .build()
            .unwrap_err();

        assert!(matches!(err, BusflowError::Configuration(ref m) if m.contains("synchronized storage")));
    }

    #[test]
    fn test_builds_with_all_collaborators() {
        let pipeline = IncomingPipelineBuilder::new()
            .with_registry(Arc::new(MessageHandlerRegistry::new()))
            .with_storage(Arc::new(RecordingStorage::new()))
            .with_adapter(Arc::new(RecordingAdapter::new()))
            .with_builder(Arc::new(StaticBuilder::new()))
            .with_deferrer(Arc::new(RecordingDeferrer::new()))
            .build();

        assert!(pipeline.is_ok());
    }
}
