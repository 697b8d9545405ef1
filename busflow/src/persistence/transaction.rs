//! Ambient transaction tokens threaded through the extension bag.
//!
//! Neither token is owned by the pipeline. Persistence implementations stash
//! their own transaction state in the token's bag and recognise it again in
//! [`SynchronizedStorageAdapter::try_adapt`](super::SynchronizedStorageAdapter::try_adapt).

use crate::context::ContextBag;

/// The outbox's open transaction for the current message.
#[derive(Debug, Default)]
pub struct OutboxTransaction {
    state: ContextBag,
}

impl OutboxTransaction {
    /// Creates an empty outbox transaction token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistence-specific state carried by the token.
    #[must_use]
    pub fn state(&self) -> &ContextBag {
        &self.state
    }
}

/// The transport's receive transaction for the current message.
#[derive(Debug, Default)]
pub struct TransportTransaction {
    state: ContextBag,
}

impl TransportTransaction {
    /// Creates an empty transport transaction token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport-specific state carried by the token.
    #[must_use]
    pub fn state(&self) -> &ContextBag {
        &self.state
    }
}

/// Borrowed view of either ambient transaction.
#[derive(Debug, Clone, Copy)]
pub enum AmbientTransaction<'a> {
    /// An outbox transaction.
    Outbox(&'a OutboxTransaction),
    /// A transport transaction.
    Transport(&'a TransportTransaction),
}

impl<'a> AmbientTransaction<'a> {
    /// Returns the state bag of the underlying token.
    #[must_use]
    pub fn state(&self) -> &'a ContextBag {
        match self {
            Self::Outbox(tx) => tx.state(),
            Self::Transport(tx) => tx.state(),
        }
    }

    /// Short label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Outbox(_) => "outbox",
            Self::Transport(_) => "transport",
        }
    }
}
