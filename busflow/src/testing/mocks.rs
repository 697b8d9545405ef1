//! Recording fakes for the external collaborators of the dispatch core.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::{BehaviorContext, ContextBag, Headers, InvokeHandlerContext, LogicalMessage};
use crate::errors::{BusflowError, Result};
use crate::handlers::{Builder, Handler, HandlerType};
use crate::persistence::{
    AmbientTransaction, CompletableSynchronizedStorageSession, SynchronizedStorage,
    SynchronizedStorageAdapter,
};
use crate::timeout::{Clock, TimeoutChunk, TimeoutStore};
use crate::transport::{Address, MessageDeferrer, MessageSender, OutgoingMessage};

/// Shared, ordered log of events across several fakes.
pub type InvocationLog = Arc<Mutex<Vec<String>>>;

/// Creates an empty shared log.
#[must_use]
pub fn invocation_log() -> InvocationLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A storage session that counts commits and releases.
#[derive(Debug)]
pub struct RecordingSession {
    name: String,
    complete_count: AtomicUsize,
    release_count: AtomicUsize,
    fail_complete: Option<String>,
    log: Option<InvocationLog>,
}

impl RecordingSession {
    /// Creates a session that commits successfully.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            complete_count: AtomicUsize::new(0),
            release_count: AtomicUsize::new(0),
            fail_complete: None,
            log: None,
        }
    }

    /// Makes `complete` fail with `reason`.
    #[must_use]
    pub fn failing_complete(mut self, reason: impl Into<String>) -> Self {
        self.fail_complete = Some(reason.into());
        self
    }

    /// Appends `"<name>:complete"` and `"<name>:release"` to `log`.
    #[must_use]
    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns the session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how often `complete` was called.
    #[must_use]
    pub fn complete_count(&self) -> usize {
        self.complete_count.load(Ordering::SeqCst)
    }

    /// Returns how often `release` was called.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.lock().push(format!("{}:{}", self.name, event));
        }
    }
}

#[async_trait]
impl CompletableSynchronizedStorageSession for RecordingSession {
    async fn complete(&self) -> Result<()> {
        self.complete_count.fetch_add(1, Ordering::SeqCst);
        self.record("complete");
        match &self.fail_complete {
            Some(reason) => Err(BusflowError::SessionCommit(reason.clone())),
            None => Ok(()),
        }
    }

    fn release(&self) {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        self.record("release");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A storage backend that hands out [`RecordingSession`]s.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    opened: Mutex<Vec<Arc<RecordingSession>>>,
    fail_with: Option<String>,
}

impl RecordingStorage {
    /// Creates a storage whose sessions commit successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `open_session` call fail.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    /// Returns the number of sessions opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Returns the sessions opened so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<RecordingSession>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl SynchronizedStorage for RecordingStorage {
    async fn open_session(
        &self,
        _extensions: &ContextBag,
    ) -> Result<Arc<dyn CompletableSynchronizedStorageSession>> {
        if let Some(reason) = &self.fail_with {
            return Err(BusflowError::SessionOpen(reason.clone()));
        }
        let mut opened = self.opened.lock();
        let session = Arc::new(RecordingSession::new(format!("opened-{}", opened.len() + 1)));
        opened.push(session.clone());
        Ok(session)
    }
}

/// An adapter that records each attempt and adapts only the configured kind.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    adapts: HashMap<&'static str, Arc<RecordingSession>>,
    attempts: Mutex<Vec<&'static str>>,
    fail_with: Option<String>,
}

impl RecordingAdapter {
    /// Creates an adapter that never adapts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapts transactions of `kind` (`"outbox"` or `"transport"`) to `session`.
    #[must_use]
    pub fn adapting(mut self, kind: &'static str, session: Arc<RecordingSession>) -> Self {
        self.adapts.insert(kind, session);
        self
    }

    /// Makes every attempt fail.
    #[must_use]
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    /// Returns the transaction kinds tried, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<&'static str> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl SynchronizedStorageAdapter for RecordingAdapter {
    async fn try_adapt(
        &self,
        transaction: AmbientTransaction<'_>,
        _extensions: &ContextBag,
    ) -> Result<Option<Arc<dyn CompletableSynchronizedStorageSession>>> {
        self.attempts.lock().push(transaction.kind());
        if let Some(reason) = &self.fail_with {
            return Err(BusflowError::StorageAdaptation(reason.clone()));
        }
        Ok(self
            .adapts
            .get(transaction.kind())
            .map(|s| s.clone() as Arc<dyn CompletableSynchronizedStorageSession>))
    }
}

/// What a [`RecordingHandler`] does after recording its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerAction {
    /// Nothing.
    #[default]
    Continue,
    /// Calls `request_no_further_dispatch`.
    StopDispatch,
    /// Calls `defer_message_to_later`.
    Defer,
}

/// A handler that records each invocation.
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    action: HandlerAction,
    calls: AtomicUsize,
    log: InvocationLog,
}

impl RecordingHandler {
    /// Creates a handler with its own log.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: HandlerAction::Continue,
            calls: AtomicUsize::new(0),
            log: invocation_log(),
        }
    }

    /// Records into a shared log instead.
    #[must_use]
    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = log;
        self
    }

    /// Sets the action taken after recording.
    #[must_use]
    pub fn with_action(mut self, action: HandlerAction) -> Self {
        self.action = action;
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the log this handler writes to.
    #[must_use]
    pub fn log(&self) -> InvocationLog {
        self.log.clone()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, _message: &serde_json::Value, ctx: &InvokeHandlerContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("{}:{}", self.name, ctx.message_id()));

        match self.action {
            HandlerAction::Continue => {}
            HandlerAction::StopDispatch => ctx.request_no_further_dispatch(),
            HandlerAction::Defer => ctx.defer_message_to_later().await?,
        }
        Ok(())
    }
}

/// A handler that always fails.
#[derive(Debug)]
pub struct FailingHandler {
    reason: String,
    calls: AtomicUsize,
}

impl FailingHandler {
    /// Creates a handler failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _message: &serde_json::Value, _ctx: &InvokeHandlerContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("{}", self.reason))
    }
}

/// A builder that returns pre-registered instances and counts builds.
#[derive(Default)]
pub struct StaticBuilder {
    instances: HashMap<HandlerType, Arc<dyn Handler>>,
    builds: Mutex<Vec<String>>,
}

impl StaticBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` for `handler_type`.
    #[must_use]
    pub fn with_handler(mut self, handler_type: impl Into<HandlerType>, instance: Arc<dyn Handler>) -> Self {
        self.instances.insert(handler_type.into(), instance);
        self
    }

    /// Returns the handler types built, in order.
    #[must_use]
    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().clone()
    }
}

impl Builder for StaticBuilder {
    fn build(&self, handler_type: &HandlerType) -> Result<Arc<dyn Handler>> {
        self.builds.lock().push(handler_type.name().to_string());
        self.instances
            .get(handler_type)
            .cloned()
            .ok_or_else(|| BusflowError::handler_build(handler_type.name(), "not registered"))
    }
}

impl std::fmt::Debug for StaticBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticBuilder")
            .field("handlers", &self.instances.len())
            .field("builds", &self.builds.lock().len())
            .finish()
    }
}

/// A deferrer that counts calls.
#[derive(Debug, Default)]
pub struct RecordingDeferrer {
    deferred: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl RecordingDeferrer {
    /// Creates a deferrer that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            deferred: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    /// Returns the ids of deferred messages, one entry per call.
    #[must_use]
    pub fn deferred(&self) -> Vec<String> {
        self.deferred.lock().clone()
    }
}

#[async_trait]
impl MessageDeferrer for RecordingDeferrer {
    async fn defer(&self, message_id: &str, _headers: &Headers, _message: &LogicalMessage) -> Result<()> {
        if let Some(reason) = &self.fail_with {
            return Err(BusflowError::Defer(reason.clone()));
        }
        self.deferred.lock().push(message_id.to_string());
        Ok(())
    }
}

/// A sender that records every message.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(OutgoingMessage, Address)>>,
    failures_left: AtomicUsize,
}

impl RecordingSender {
    /// Creates a sender that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Returns the sent messages with their destinations.
    #[must_use]
    pub fn sent(&self) -> Vec<(OutgoingMessage, Address)> {
        self.sent.lock().clone()
    }

    /// Returns the number of sent messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Returns true if nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: OutgoingMessage, destination: &Address) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusflowError::send(destination.as_str(), "transport unavailable"));
        }
        self.sent.lock().push((message, destination.clone()));
        Ok(())
    }
}

/// A timeout store that replays scripted chunks.
///
/// Once the script is exhausted it returns empty chunks whose next query time
/// is one minute past the clock.
pub struct ScriptedTimeoutStore {
    clock: Arc<dyn Clock>,
    chunks: Mutex<VecDeque<TimeoutChunk>>,
    start_slices: Mutex<Vec<DateTime<Utc>>>,
    fail_with: Mutex<Option<String>>,
}

impl ScriptedTimeoutStore {
    /// Creates an empty script.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            chunks: Mutex::new(VecDeque::new()),
            start_slices: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }

    /// Appends a chunk to the script.
    pub fn push_chunk(&self, chunk: TimeoutChunk) {
        self.chunks.lock().push_back(chunk);
    }

    /// Makes every query fail until [`Self::recover`] is called.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.fail_with.lock() = Some(reason.into());
    }

    /// Stops failing.
    pub fn recover(&self) {
        *self.fail_with.lock() = None;
    }

    /// Returns the number of queries made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.start_slices.lock().len()
    }

    /// Returns the start slice of every query, in order.
    #[must_use]
    pub fn start_slices(&self) -> Vec<DateTime<Utc>> {
        self.start_slices.lock().clone()
    }
}

impl std::fmt::Debug for ScriptedTimeoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTimeoutStore")
            .field("remaining", &self.chunks.lock().len())
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl TimeoutStore for ScriptedTimeoutStore {
    async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutChunk> {
        self.start_slices.lock().push(start_slice);

        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(BusflowError::StorageConnectivity(reason));
        }

        let next = self.chunks.lock().pop_front();
        Ok(next.unwrap_or_else(|| TimeoutChunk::empty(self.clock.now() + Duration::minutes(1))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sender_fail_next() {
        let sender = RecordingSender::new();
        let dest = Address::new("q");
        sender.fail_next(1);

        assert!(sender.send(OutgoingMessage::new(), &dest).await.is_err());
        assert!(sender.send(OutgoingMessage::new(), &dest).await.is_ok());
        assert_eq!(sender.len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_matches_kind() {
        let session = Arc::new(RecordingSession::new("tx"));
        let adapter = RecordingAdapter::new().adapting("transport", session);
        let outbox = crate::persistence::OutboxTransaction::new();
        let transport = crate::persistence::TransportTransaction::new();
        let bag = ContextBag::new();

        assert!(adapter.try_adapt(AmbientTransaction::Outbox(&outbox), &bag).await.unwrap().is_none());
        assert!(adapter.try_adapt(AmbientTransaction::Transport(&transport), &bag).await.unwrap().is_some());
        assert_eq!(adapter.attempts(), vec!["outbox", "transport"]);
    }
}
