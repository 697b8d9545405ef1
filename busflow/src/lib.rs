//! # Busflow
//!
//! The incoming-message core of a service bus endpoint.
//!
//! Busflow provides:
//!
//! - **Transactional dispatch**: every handler registered for a message runs
//!   inside one synchronized storage session that commits once
//! - **Handler control**: handlers can stop dispatch or defer the message
//! - **Composable stages**: typed connectors and same-context behaviors
//!   assembled once at startup
//! - **Timeout redelivery**: a background poller that turns due timeouts into
//!   control messages, guarded by a repeated-failures circuit breaker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use busflow::prelude::*;
//!
//! let registry = MessageHandlerRegistry::new().with_handler("Invoice", "BillCustomer");
//! let pipeline = IncomingPipelineBuilder::new()
//!     .with_registry(Arc::new(registry))
//!     .with_storage(Arc::new(InMemorySynchronizedStorage))
//!     .with_adapter(Arc::new(InMemoryStorageAdapter))
//!     .with_builder(Arc::new(builder))
//!     .with_deferrer(deferrer)
//!     .build()?;
//!
//! pipeline.invoke(&ctx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod testing;
pub mod timeout;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::{
        BehaviorContext, ContextBag, Headers, IncomingLogicalMessageContext,
        IncomingUnitOfWorkContext, InvokeHandlerContext, LogicalMessage, MessageMetadata,
        MessageType,
    };
    pub use crate::errors::{BusflowError, CriticalError, Result};
    pub use crate::handlers::{
        Builder, FactoryBuilder, Handler, HandlerRegistry, HandlerType, MessageHandler,
        MessageHandlerRegistry,
    };
    pub use crate::observability::{init_logging, LogFormat, LoggingBehavior};
    pub use crate::persistence::{
        CompletableSynchronizedStorageSession, InMemoryStorageAdapter,
        InMemorySynchronizedStorage, OutboxTransaction, SynchronizedStorage,
        SynchronizedStorageAdapter, SynchronizedStorageSession, TransportTransaction,
    };
    pub use crate::pipeline::{
        Behavior, Continuation, IncomingPipeline, IncomingPipelineBuilder, Next,
        StageConnector,
    };
    pub use crate::timeout::{
        Clock, CriticalErrorAction, InMemoryTimeoutStore, SystemClock, TimeoutManager,
        TimeoutPoller, TimeoutPollerConfig, TimeoutStore,
    };
    pub use crate::transport::{Address, MessageDeferrer, MessageSender, OutgoingMessage};
}
