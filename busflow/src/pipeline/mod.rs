//! Incoming message pipeline.
//!
//! This module provides:
//! - Typed stage connectors and continuations
//! - Same-context behaviors around handler invocation
//! - The unit-of-work and handler dispatch stages
//! - A builder that composes them once at startup

mod behavior;
mod builder;
mod connector;
mod load_handlers;
mod terminator;
mod unit_of_work;

pub use behavior::{Behavior, BehaviorChain, Next};
pub use builder::{IncomingPipeline, IncomingPipelineBuilder};
pub use connector::{Connected, Continuation, StageConnector};
pub use load_handlers::LoadHandlersConnector;
pub use terminator::InvokeHandlerTerminator;
pub use unit_of_work::UnitOfWorkConnector;
