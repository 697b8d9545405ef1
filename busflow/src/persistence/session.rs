//! Storage session contracts and the scoped session guard.

use crate::context::ContextBag;
use crate::errors::Result;
use async_trait::async_trait;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use super::AmbientTransaction;

/// A transactional persistence resource in its completable state.
///
/// Implementations must tolerate `release` being called after `complete`,
/// and must discard uncommitted work when released without completion.
#[async_trait]
pub trait CompletableSynchronizedStorageSession: Send + Sync + Debug {
    /// Commits the work done through this session.
    async fn complete(&self) -> Result<()>;

    /// Releases the session, discarding anything not yet committed.
    fn release(&self);

    /// Exposes the concrete session for downcasting by handlers.
    fn as_any(&self) -> &dyn Any;
}

/// Opens brand-new sessions against the storage backend.
#[async_trait]
pub trait SynchronizedStorage: Send + Sync {
    /// Opens a new completable session.
    async fn open_session(
        &self,
        extensions: &ContextBag,
    ) -> Result<Arc<dyn CompletableSynchronizedStorageSession>>;
}

/// Adapts a session from an ambient transaction.
#[async_trait]
pub trait SynchronizedStorageAdapter: Send + Sync {
    /// Returns a session bound to `transaction`, or `None` if this adapter
    /// does not recognise it.
    async fn try_adapt(
        &self,
        transaction: AmbientTransaction<'_>,
        extensions: &ContextBag,
    ) -> Result<Option<Arc<dyn CompletableSynchronizedStorageSession>>>;
}

/// Handle to the storage session shared by every handler of one message.
///
/// Handlers can reach the concrete session through [`Self::downcast_ref`] but
/// cannot commit or release it.
#[derive(Clone)]
pub struct SynchronizedStorageSession {
    inner: Arc<dyn CompletableSynchronizedStorageSession>,
}

impl SynchronizedStorageSession {
    /// Wraps a completable session.
    #[must_use]
    pub fn new(inner: Arc<dyn CompletableSynchronizedStorageSession>) -> Self {
        Self { inner }
    }

    /// Returns the concrete session if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Returns true if both handles refer to the same session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for SynchronizedStorageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SynchronizedStorageSession")
            .field(&self.inner)
            .finish()
    }
}

/// Scoped ownership of a completable session.
///
/// The session is released when the scope is dropped, on every exit path
/// including early returns, errors, and cancelled futures.
pub struct SessionScope {
    session: Arc<dyn CompletableSynchronizedStorageSession>,
    completed: bool,
}

impl SessionScope {
    /// Takes ownership of a freshly acquired session.
    #[must_use]
    pub fn new(session: Arc<dyn CompletableSynchronizedStorageSession>) -> Self {
        Self {
            session,
            completed: false,
        }
    }

    /// Returns a shareable handle to the session.
    #[must_use]
    pub fn handle(&self) -> SynchronizedStorageSession {
        SynchronizedStorageSession::new(self.session.clone())
    }

    /// Commits the session.
    pub async fn complete(&mut self) -> Result<()> {
        self.session.complete().await?;
        self.completed = true;
        Ok(())
    }

    /// Returns true once `complete` has succeeded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        if !self.completed {
            debug!("Releasing storage session without commit");
        }
        self.session.release();
    }
}

impl Debug for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionScope")
            .field("session", &self.session)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;

    #[tokio::test]
    async fn test_scope_releases_on_drop() {
        let session = Arc::new(RecordingSession::new("s1"));
        {
            let _scope = SessionScope::new(session.clone());
        }

        assert_eq!(session.complete_count(), 0);
        assert_eq!(session.release_count(), 1);
    }

    #[tokio::test]
    async fn test_scope_complete_then_release() {
        let session = Arc::new(RecordingSession::new("s1"));
        {
            let mut scope = SessionScope::new(session.clone());
            scope.complete().await.unwrap();
            assert!(scope.is_completed());
        }

        assert_eq!(session.complete_count(), 1);
        assert_eq!(session.release_count(), 1);
    }

    #[tokio::test]
    async fn test_handle_downcast_and_identity() {
        let session = Arc::new(RecordingSession::new("s1"));
        let scope = SessionScope::new(session);

        let a = scope.handle();
        let b = scope.handle();
        assert!(a.same_session(&b));
        assert_eq!(a.downcast_ref::<RecordingSession>().unwrap().name(), "s1");
    }
}
