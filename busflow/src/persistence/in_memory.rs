//! In-memory synchronized storage.
//!
//! Work is enlisted as closures on an [`InMemoryTransaction`] and only runs
//! when the transaction commits. Adapted sessions never commit the ambient
//! transaction themselves; its owner does.

use super::{
    AmbientTransaction, CompletableSynchronizedStorageSession, SynchronizedStorage,
    SynchronizedStorageAdapter,
};
use crate::context::ContextBag;
use crate::errors::{BusflowError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

type EnlistedAction = Box<dyn FnOnce() + Send>;

/// A transaction over in-memory state.
#[derive(Default)]
pub struct InMemoryTransaction {
    actions: Mutex<Vec<EnlistedAction>>,
    committed: AtomicBool,
}

impl InMemoryTransaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enlists an action to run on commit.
    pub fn enlist<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.lock().push(Box::new(action));
    }

    /// Runs all enlisted actions in enlistment order.
    ///
    /// # Errors
    ///
    /// Returns `SessionCommit` if the transaction was already committed.
    pub fn commit(&self) -> Result<()> {
        if self
            .committed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BusflowError::SessionCommit(
                "transaction already committed".to_string(),
            ));
        }

        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions {
            action();
        }
        Ok(())
    }

    /// Discards all pending actions.
    pub fn rollback(&self) {
        self.actions.lock().clear();
    }

    /// Returns the number of pending actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.actions.lock().len()
    }

    /// Returns true once committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransaction")
            .field("pending", &self.pending_count())
            .field("committed", &self.is_committed())
            .finish()
    }
}

/// A storage session backed by an [`InMemoryTransaction`].
#[derive(Debug)]
pub struct InMemoryStorageSession {
    transaction: Arc<InMemoryTransaction>,
    owns_transaction: bool,
    released: AtomicBool,
}

impl InMemoryStorageSession {
    /// Creates a session that owns a fresh transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transaction: Arc::new(InMemoryTransaction::new()),
            owns_transaction: true,
            released: AtomicBool::new(false),
        }
    }

    /// Creates a session bound to someone else's transaction.
    #[must_use]
    pub fn adapted(transaction: Arc<InMemoryTransaction>) -> Self {
        Self {
            transaction,
            owns_transaction: false,
            released: AtomicBool::new(false),
        }
    }

    /// Enlists work to run when the transaction commits.
    pub fn enlist<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.transaction.enlist(action);
    }

    /// Returns the underlying transaction.
    #[must_use]
    pub fn transaction(&self) -> &Arc<InMemoryTransaction> {
        &self.transaction
    }

    /// Returns true if this session was adapted from an ambient transaction.
    #[must_use]
    pub fn is_adapted(&self) -> bool {
        !self.owns_transaction
    }

    /// Returns true once released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStorageSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletableSynchronizedStorageSession for InMemoryStorageSession {
    async fn complete(&self) -> Result<()> {
        if self.owns_transaction {
            self.transaction.commit()
        } else {
            Ok(())
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.owns_transaction && !self.transaction.is_committed() {
            debug!(
                pending = self.transaction.pending_count(),
                "Rolling back in-memory transaction"
            );
            self.transaction.rollback();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opens sessions over fresh in-memory transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemorySynchronizedStorage;

#[async_trait]
impl SynchronizedStorage for InMemorySynchronizedStorage {
    async fn open_session(
        &self,
        _extensions: &ContextBag,
    ) -> Result<Arc<dyn CompletableSynchronizedStorageSession>> {
        Ok(Arc::new(InMemoryStorageSession::new()))
    }
}

/// Adapts sessions from ambient tokens that carry an [`InMemoryTransaction`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStorageAdapter;

#[async_trait]
impl SynchronizedStorageAdapter for InMemoryStorageAdapter {
    async fn try_adapt(
        &self,
        transaction: AmbientTransaction<'_>,
        _extensions: &ContextBag,
    ) -> Result<Option<Arc<dyn CompletableSynchronizedStorageSession>>> {
        Ok(transaction.state().get::<InMemoryTransaction>().map(|tx| {
            Arc::new(InMemoryStorageSession::adapted(tx)) as Arc<dyn CompletableSynchronizedStorageSession>
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{OutboxTransaction, TransportTransaction};
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_owned_session_commits_enlisted_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let session = InMemoryStorageSession::new();

        let c = counter.clone();
        session.enlist(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        session.complete().await.unwrap();
        session.release();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(session.is_released());
    }

    #[tokio::test]
    async fn test_release_without_commit_discards_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let session = InMemoryStorageSession::new();

        let c = counter.clone();
        session.enlist(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        session.release();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(session.transaction().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_adapted_session_leaves_commit_to_owner() {
        let tx = Arc::new(InMemoryTransaction::new());
        let session = InMemoryStorageSession::adapted(tx.clone());
        session.enlist(|| {});

        session.complete().await.unwrap();
        session.release();

        assert!(!tx.is_committed());
        assert_eq!(tx.pending_count(), 1);
    }

    #[test]
    fn test_double_commit_fails() {
        let tx = InMemoryTransaction::new();
        tx.commit().unwrap();
        assert!(matches!(tx.commit(), Err(BusflowError::SessionCommit(_))));
    }

    #[tokio::test]
    async fn test_adapter_recognises_tokens() {
        let adapter = InMemoryStorageAdapter;
        let extensions = ContextBag::new();

        let outbox = OutboxTransaction::new();
        outbox.state().set(InMemoryTransaction::new());
        let adapted = adapter
            .try_adapt(AmbientTransaction::Outbox(&outbox), &extensions)
            .await
            .unwrap();
        assert!(adapted.is_some());

        let transport = TransportTransaction::new();
        let adapted = adapter
            .try_adapt(AmbientTransaction::Transport(&transport), &extensions)
            .await
            .unwrap();
        assert!(adapted.is_none());
    }
}
