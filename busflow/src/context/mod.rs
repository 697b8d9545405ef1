//! Context management for incoming message processing.
//!
//! This module provides:
//! - The logical message model and well-known headers
//! - Type-keyed extension bags with parent fallback
//! - Typed per-stage execution contexts

mod bags;
mod execution;
mod message;

pub use bags::ContextBag;
pub use execution::{
    BehaviorContext, IncomingLogicalMessageContext, IncomingUnitOfWorkContext,
    InvokeHandlerContext,
};
pub use message::{headers, Headers, LogicalMessage, MessageMetadata, MessageType};
