//! Timeout manager: persists new timeouts and pushes them to observers.

use super::{TimeoutData, TimeoutPersister};
use crate::errors::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receives push notifications for freshly persisted timeouts.
///
/// May be called concurrently from any thread.
pub trait TimeoutPushObserver: Send + Sync {
    /// Called after `timeout` has been persisted.
    fn on_timeout_pushed(&self, timeout: &TimeoutData);
}

/// Handle returned by [`TimeoutPushNotifier::subscribe`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a subscription handle makes it impossible to unsubscribe"]
pub struct Subscription {
    id: u64,
}

/// Source of timeout push notifications.
pub trait TimeoutPushNotifier: Send + Sync {
    /// Registers an observer.
    fn subscribe(&self, observer: Arc<dyn TimeoutPushObserver>) -> Subscription;

    /// Removes a previously registered observer.
    ///
    /// Returns false if the subscription was already removed.
    fn unsubscribe(&self, subscription: Subscription) -> bool;
}

/// Persists timeouts and notifies subscribed observers.
pub struct TimeoutManager {
    persister: Arc<dyn TimeoutPersister>,
    observers: RwLock<Vec<(u64, Arc<dyn TimeoutPushObserver>)>>,
    next_id: AtomicU64,
}

impl TimeoutManager {
    /// Creates a manager over `persister`.
    #[must_use]
    pub fn new(persister: Arc<dyn TimeoutPersister>) -> Self {
        Self {
            persister,
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Persists `timeout`, then notifies every observer.
    ///
    /// # Errors
    ///
    /// Propagates the persister's error; observers are not notified then.
    pub async fn push_timeout(&self, timeout: TimeoutData) -> Result<()> {
        self.persister.add(timeout.clone()).await?;

        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        debug!(
            timeout_id = %timeout.id,
            due = %timeout.time,
            observers = observers.len(),
            "Timeout pushed"
        );

        for observer in observers {
            observer.on_timeout_pushed(&timeout);
        }
        Ok(())
    }

    /// Removes a timeout from the persister.
    pub async fn remove_timeout(&self, timeout_id: &str) -> Result<Option<TimeoutData>> {
        self.persister.try_remove(timeout_id).await
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl TimeoutPushNotifier for TimeoutManager {
    fn subscribe(&self, observer: Arc<dyn TimeoutPushObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().push((id, observer));
        Subscription { id }
    }

    fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(id, _)| *id != subscription.id);
        observers.len() != before
    }
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("observers", &self.observer_count())
            .finish()
    }
}
