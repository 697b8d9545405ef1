//! Storage session abstraction.
//!
//! This module provides:
//! - Contracts for opening and adapting synchronized storage sessions
//! - Ambient outbox and transport transaction tokens
//! - A scoped guard that always releases the session
//! - An in-memory storage implementation

mod in_memory;
mod session;
mod transaction;

pub use in_memory::{
    InMemoryStorageAdapter, InMemoryStorageSession, InMemorySynchronizedStorage,
    InMemoryTransaction,
};
pub use session::{
    CompletableSynchronizedStorageSession, SessionScope, SynchronizedStorage,
    SynchronizedStorageAdapter, SynchronizedStorageSession,
};
pub use transaction::{AmbientTransaction, OutboxTransaction, TransportTransaction};
