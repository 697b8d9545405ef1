//! Background poller that redelivers due timeouts.
//!
//! This module provides:
//! - [`TimeoutPoller`], which owns one background task per started poller
//! - [`PollerState`], the observable lifecycle state
//!
//! The loop queries the store when the poll deadline is reached, sends one
//! control message per due timeout to the dispatcher address, and reschedules
//! itself. Failures are recorded with a [`RepeatedFailuresCircuitBreaker`] and
//! the loop restarts after one poll interval.

use super::{
    Clock, CriticalErrorAction, PollDeadline, RepeatedFailuresCircuitBreaker, Subscription,
    TimeoutData, TimeoutPollerConfig, TimeoutPushNotifier, TimeoutPushObserver, TimeoutStore,
};
use crate::cancellation::CancellationToken;
use crate::errors::{BusflowError, Result};
use crate::transport::{MessageSender, OutgoingMessage};
use chrono::{DateTime, Months, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Name of the breaker guarding timeout storage access.
pub const STORAGE_BREAKER_NAME: &str = "TimeoutStorageConnectivity";

/// Lifecycle state of a [`TimeoutPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    /// Not running.
    Stopped,
    /// Start has been called; the loop has not reached its first wait yet.
    Starting,
    /// The loop is running.
    Polling,
    /// Stop has been called; waiting for the loop to exit.
    Stopping,
}

/// State shared between the loop and push notifiers.
struct PollerShared {
    deadline: PollDeadline,
    wake: Notify,
}

impl TimeoutPushObserver for PollerShared {
    fn on_timeout_pushed(&self, timeout: &TimeoutData) {
        if self.deadline.on_push(timeout.time) {
            debug!(timeout_id = %timeout.id, due = %timeout.time, "Poll deadline pulled forward");
            self.wake.notify_one();
        }
    }
}

/// Everything the background task needs.
struct PollLoop {
    config: TimeoutPollerConfig,
    store: Arc<dyn TimeoutStore>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
    shared: Arc<PollerShared>,
    breaker: Arc<RepeatedFailuresCircuitBreaker>,
    token: Arc<CancellationToken>,
    state: Arc<RwLock<PollerState>>,
}

struct RunningPoller {
    handle: JoinHandle<()>,
    subscription: Subscription,
    token: Arc<CancellationToken>,
    shared: Arc<PollerShared>,
    breaker: Arc<RepeatedFailuresCircuitBreaker>,
}

/// Polls a timeout store and sends control messages for due timeouts.
///
/// Dropping a started poller cancels its loop; call [`stop`](Self::stop)
/// first when the caller needs to know the loop has exited.
pub struct TimeoutPoller {
    config: TimeoutPollerConfig,
    store: Arc<dyn TimeoutStore>,
    sender: Arc<dyn MessageSender>,
    notifier: Arc<dyn TimeoutPushNotifier>,
    clock: Arc<dyn Clock>,
    on_critical: CriticalErrorAction,
    state: Arc<RwLock<PollerState>>,
    running: Mutex<Option<RunningPoller>>,
}

impl TimeoutPoller {
    /// Creates a stopped poller.
    #[must_use]
    pub fn new(
        config: TimeoutPollerConfig,
        store: Arc<dyn TimeoutStore>,
        sender: Arc<dyn MessageSender>,
        notifier: Arc<dyn TimeoutPushNotifier>,
        clock: Arc<dyn Clock>,
        on_critical: CriticalErrorAction,
    ) -> Self {
        Self {
            config,
            store,
            sender,
            notifier,
            clock,
            on_critical,
            state: Arc::new(RwLock::new(PollerState::Stopped)),
            running: Mutex::new(None),
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> PollerState {
        *self.state.read()
    }

    /// Returns the scheduled retrieval time while running.
    #[must_use]
    pub fn next_retrieval(&self) -> Option<DateTime<Utc>> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.shared.deadline.next_retrieval())
    }

    /// Returns the storage breaker while running.
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<Arc<RepeatedFailuresCircuitBreaker>> {
        self.running.lock().as_ref().map(|r| r.breaker.clone())
    }

    /// Starts the background loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid config and `Internal` if the
    /// poller is already running.
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(BusflowError::Internal("timeout poller already started".to_string()));
        }
        *self.state.write() = PollerState::Starting;

        let breaker = Arc::new(RepeatedFailuresCircuitBreaker::new(
            STORAGE_BREAKER_NAME,
            self.config.circuit_breaker.failure_threshold,
            self.config.circuit_breaker.window(),
            self.on_critical.clone(),
        ));
        let shared = Arc::new(PollerShared {
            deadline: PollDeadline::new(self.clock.now(), self.config.max_retrieval_interval()),
            wake: Notify::new(),
        });
        let subscription = self.notifier.subscribe(shared.clone());
        let token = Arc::new(CancellationToken::new());

        let poll_loop = Arc::new(PollLoop {
            config: self.config.clone(),
            store: self.store.clone(),
            sender: self.sender.clone(),
            clock: self.clock.clone(),
            shared: shared.clone(),
            breaker: breaker.clone(),
            token: token.clone(),
            state: self.state.clone(),
        });
        let handle = tokio::spawn(poll_loop.run());

        info!(
            dispatcher = %self.config.dispatcher_address,
            poll_interval_ms = self.config.poll_interval_ms,
            "Timeout poller started"
        );

        *running = Some(RunningPoller {
            handle,
            subscription,
            token,
            shared,
            breaker,
        });
        Ok(())
    }

    /// Stops the loop and waits until it has exited.
    ///
    /// No store or sender call is in flight once this returns. Calling it on
    /// a stopped poller does nothing.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        *self.state.write() = PollerState::Stopping;

        self.notifier.unsubscribe(running.subscription);
        running.token.cancel("timeout poller stopping");

        if let Err(e) = running.handle.await {
            warn!("Timeout poller task ended abnormally: {}", e);
        }

        *self.state.write() = PollerState::Stopped;
        info!("Timeout poller stopped");
    }
}

impl Drop for TimeoutPoller {
    /// Unsubscribes and cancels a running loop without waiting for it.
    ///
    /// The loop exits at its next cancellation check. Use [`stop`](Self::stop)
    /// to wait until no store or sender call is in flight.
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            self.notifier.unsubscribe(running.subscription);
            running.token.cancel("timeout poller dropped");
            warn!("Timeout poller dropped while running");
        }
    }
}

impl std::fmt::Debug for TimeoutPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPoller")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl PollLoop {
    async fn run(self: Arc<Self>) {
        *self.state.write() = PollerState::Polling;

        while !self.token.is_cancelled() {
            let outcome = AssertUnwindSafe(self.poll_until_cancelled())
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => break,
                Ok(Err(e)) if e.is_retryable_locally() => {
                    warn!(error = %e, kind = e.kind(), "Failed to fetch timeouts from the timeout storage");
                    e.to_string()
                }
                Ok(Err(e)) => {
                    error!(error = %e, kind = e.kind(), "Unexpected failure in the timeout poll loop");
                    e.to_string()
                }
                Err(panic) => {
                    let failure = panic_message(&*panic);
                    error!(error = %failure, "Timeout poll iteration panicked");
                    failure
                }
            };

            self.breaker.failure(&failure, self.clock.now());

            if !self.back_off().await {
                break;
            }
        }

        debug!(reason = ?self.token.reason(), "Timeout poll loop exited");
    }

    /// Runs poll iterations until cancelled. Returns the first error.
    async fn poll_until_cancelled(&self) -> Result<()> {
        let mut start_slice = lookback_start(self.clock.now(), self.config.lookback_years);

        loop {
            if !self.wait_until_due().await {
                return Ok(());
            }
            if !self.spin_once(&mut start_slice).await? {
                return Ok(());
            }
            self.breaker.success();
        }
    }

    /// Fetches and dispatches one chunk. Returns false if cancelled mid-chunk.
    async fn spin_once(&self, start_slice: &mut DateTime<Utc>) -> Result<bool> {
        debug!(start_slice = %start_slice, "Polling for timeouts");

        let chunk = self.store.get_next_chunk(*start_slice).await?;
        let destination = &self.config.dispatcher_address;

        for due in &chunk.due {
            if self.token.is_cancelled() {
                return Ok(false);
            }

            self.sender
                .send(OutgoingMessage::timeout_control(&due.id, destination), destination)
                .await?;

            if due.due > *start_slice {
                *start_slice = due.due;
            }
        }

        let next = self
            .shared
            .deadline
            .schedule_after_chunk(chunk.next_query_time, self.clock.now());
        debug!(
            dispatched = chunk.due.len(),
            next_retrieval = %next,
            "Timeout chunk processed"
        );
        Ok(true)
    }

    /// Sleeps until the deadline. Returns false if cancelled first.
    async fn wait_until_due(&self) -> bool {
        loop {
            if self.token.is_cancelled() {
                return false;
            }

            let now = self.clock.now();
            let next = self.shared.deadline.next_retrieval();
            if now >= next {
                return true;
            }

            let poll_interval = self.config.poll_interval();
            let remaining = (next - now).to_std().unwrap_or_default().min(poll_interval);

            tokio::select! {
                () = self.token.cancelled() => return false,
                () = self.shared.wake.notified() => {}
                () = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// Waits one poll interval after a failure. Returns false if cancelled.
    async fn back_off(&self) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(self.config.poll_interval()) => true,
        }
    }
}

fn lookback_start(now: DateTime<Utc>, years: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("poll iteration panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("poll iteration panicked: {s}")
    } else {
        "poll iteration panicked".to_string()
    }
}
