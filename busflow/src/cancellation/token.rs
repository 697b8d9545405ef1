//! Shutdown signal for background loops.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A one-shot cancellation signal shared between a loop and its owner.
///
/// The owner calls [`cancel`](Self::cancel); the loop checks
/// [`is_cancelled`](Self::is_cancelled) between units of work and races
/// [`cancelled`](Self::cancelled) against its sleeps. The first reason given
/// is kept.
#[derive(Default)]
pub struct CancellationToken {
    flag: AtomicBool,
    reason: Mutex<Option<String>>,
    waiters: Notify,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation and wakes every waiter.
    ///
    /// Returns true for the call that actually cancelled the token.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason.into());
        }
        self.flag.store(true, Ordering::SeqCst);
        self.waiters.notify_waiters();
        true
    }

    /// Returns true once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns the reason passed to the first `cancel` call.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent cancel is seen.
            let notified = self.waiters.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());

        assert!(token.cancel("poller stopping"));
        assert!(!token.cancel("again"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("poller stopping"));
    }

    #[tokio::test]
    async fn test_cancel_wakes_every_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let token = token.clone();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("stop");

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_select_against_sleep() {
        let token = CancellationToken::new();
        token.cancel("done");

        let cancelled = tokio::select! {
            () = token.cancelled() => true,
            () = tokio::time::sleep(Duration::from_secs(5)) => false,
        };
        assert!(cancelled);
    }
}
