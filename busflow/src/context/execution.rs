//! Typed execution contexts for the incoming message pipeline.
//!
//! Each stage receives its own context type. Child contexts copy the shared,
//! immutable parts of the message from their parent and chain their extension
//! bag to the parent's bag for fallback lookups.

use super::{ContextBag, Headers, LogicalMessage};
use crate::errors::{BusflowError, Result};
use crate::handlers::MessageHandler;
use crate::persistence::SynchronizedStorageSession;
use crate::transport::MessageDeferrer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Behaviour shared by every incoming context.
pub trait BehaviorContext: Send + Sync {
    /// Returns the incoming message id.
    fn message_id(&self) -> &str;

    /// Returns the reply-to address, if the sender set one.
    fn reply_to_address(&self) -> Option<&str>;

    /// Returns the incoming headers.
    fn headers(&self) -> &Headers;

    /// Returns the extension bag.
    fn extensions(&self) -> &Arc<ContextBag>;
}

/// Context for a deserialized incoming message.
#[derive(Debug)]
pub struct IncomingLogicalMessageContext {
    message_id: String,
    reply_to_address: Option<String>,
    headers: Arc<Headers>,
    message: Arc<LogicalMessage>,
    message_handled: AtomicBool,
    extensions: Arc<ContextBag>,
}

impl IncomingLogicalMessageContext {
    /// Creates a context for `message` with a generated message id.
    #[must_use]
    pub fn new(message: LogicalMessage) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            reply_to_address: None,
            headers: Arc::new(Headers::new()),
            message: Arc::new(message),
            message_handled: AtomicBool::new(false),
            extensions: Arc::new(ContextBag::new()),
        }
    }

    /// Sets the message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Sets the reply-to address.
    #[must_use]
    pub fn with_reply_to_address(mut self, address: impl Into<String>) -> Self {
        self.reply_to_address = Some(address.into());
        self
    }

    /// Sets the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Arc::new(headers);
        self
    }

    /// Uses `extensions` as the extension bag.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Arc<ContextBag>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Returns the logical message.
    #[must_use]
    pub fn message(&self) -> &Arc<LogicalMessage> {
        &self.message
    }

    /// Returns true once the message has been handled.
    #[must_use]
    pub fn is_message_handled(&self) -> bool {
        self.message_handled.load(Ordering::SeqCst)
    }

    /// Marks the message as handled.
    pub fn mark_handled(&self) {
        self.message_handled.store(true, Ordering::SeqCst);
    }

    fn shared_headers(&self) -> Arc<Headers> {
        self.headers.clone()
    }
}

impl BehaviorContext for IncomingLogicalMessageContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn reply_to_address(&self) -> Option<&str> {
        self.reply_to_address.as_deref()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn extensions(&self) -> &Arc<ContextBag> {
        &self.extensions
    }
}

/// Context spanning the unit of work for one message.
#[derive(Debug)]
pub struct IncomingUnitOfWorkContext {
    message_id: String,
    reply_to_address: Option<String>,
    headers: Arc<Headers>,
    message: Arc<LogicalMessage>,
    handlers_to_invoke: Vec<MessageHandler>,
    session: SynchronizedStorageSession,
    extensions: Arc<ContextBag>,
}

impl IncomingUnitOfWorkContext {
    /// Creates the unit-of-work context from its parent.
    #[must_use]
    pub fn new(
        handlers_to_invoke: Vec<MessageHandler>,
        session: SynchronizedStorageSession,
        parent: &IncomingLogicalMessageContext,
    ) -> Self {
        let extensions = Arc::new(ContextBag::with_parent(parent.extensions.clone()));
        extensions.set(session.clone());

        Self {
            message_id: parent.message_id.clone(),
            reply_to_address: parent.reply_to_address.clone(),
            headers: parent.shared_headers(),
            message: parent.message.clone(),
            handlers_to_invoke,
            session,
            extensions,
        }
    }

    /// Returns the message being handled.
    #[must_use]
    pub fn message(&self) -> &Arc<LogicalMessage> {
        &self.message
    }

    /// Returns the handlers to invoke, in order.
    #[must_use]
    pub fn handlers_to_invoke(&self) -> &[MessageHandler] {
        &self.handlers_to_invoke
    }

    /// Returns the storage session shared by all handlers.
    #[must_use]
    pub fn session(&self) -> &SynchronizedStorageSession {
        &self.session
    }
}

impl BehaviorContext for IncomingUnitOfWorkContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn reply_to_address(&self) -> Option<&str> {
        self.reply_to_address.as_deref()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn extensions(&self) -> &Arc<ContextBag> {
        &self.extensions
    }
}

/// Context for one handler invocation.
///
/// `invocation_aborted` and `defer_called` start false and can only become
/// true.
pub struct InvokeHandlerContext {
    handler: MessageHandler,
    message_id: String,
    reply_to_address: Option<String>,
    headers: Arc<Headers>,
    message: Arc<LogicalMessage>,
    session: SynchronizedStorageSession,
    extensions: Arc<ContextBag>,
    deferrer: Arc<dyn MessageDeferrer>,
    invocation_aborted: AtomicBool,
    defer_called: AtomicBool,
}

impl InvokeHandlerContext {
    /// Creates the invocation context for `handler` from its parent.
    #[must_use]
    pub fn new(
        handler: MessageHandler,
        deferrer: Arc<dyn MessageDeferrer>,
        parent: &IncomingUnitOfWorkContext,
    ) -> Self {
        let extensions = Arc::new(ContextBag::with_parent(parent.extensions.clone()));

        Self {
            handler,
            message_id: parent.message_id.clone(),
            reply_to_address: parent.reply_to_address.clone(),
            headers: parent.headers.clone(),
            message: parent.message.clone(),
            session: parent.session.clone(),
            extensions,
            deferrer,
            invocation_aborted: AtomicBool::new(false),
            defer_called: AtomicBool::new(false),
        }
    }

    /// Returns the handler being invoked.
    #[must_use]
    pub fn message_handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Returns the logical message.
    #[must_use]
    pub fn message(&self) -> &Arc<LogicalMessage> {
        &self.message
    }

    /// Returns the message body.
    #[must_use]
    pub fn message_being_handled(&self) -> &serde_json::Value {
        &self.message.instance
    }

    /// Returns the shared storage session.
    #[must_use]
    pub fn session(&self) -> &SynchronizedStorageSession {
        &self.session
    }

    /// Returns true once dispatch to further handlers has been stopped.
    #[must_use]
    pub fn is_invocation_aborted(&self) -> bool {
        self.invocation_aborted.load(Ordering::SeqCst)
    }

    /// Returns true once the message has been deferred.
    #[must_use]
    pub fn defer_called(&self) -> bool {
        self.defer_called.load(Ordering::SeqCst)
    }

    /// Stops dispatching the current message to any remaining handlers.
    ///
    /// The unit of work still commits.
    pub fn request_no_further_dispatch(&self) {
        if !self.invocation_aborted.swap(true, Ordering::SeqCst) {
            debug!(
                message_id = %self.message_id,
                handler = %self.handler.handler_type(),
                "Handler requested no further dispatch"
            );
        }
    }

    /// Re-enqueues the current message and stops further dispatch.
    ///
    /// Every call re-enqueues again; the flags do not guard the side effect.
    ///
    /// # Errors
    ///
    /// Propagates the deferrer's error; the flags stay untouched in that case.
    pub async fn defer_message_to_later(&self) -> Result<()> {
        self.deferrer
            .defer(&self.message_id, &self.headers, &self.message)
            .await
            .map_err(|e| match e {
                BusflowError::Defer(_) => e,
                other => BusflowError::Defer(other.to_string()),
            })?;

        self.defer_called.store(true, Ordering::SeqCst);
        self.request_no_further_dispatch();
        Ok(())
    }
}

impl BehaviorContext for InvokeHandlerContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn reply_to_address(&self) -> Option<&str> {
        self.reply_to_address.as_deref()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn extensions(&self) -> &Arc<ContextBag> {
        &self.extensions
    }
}

impl std::fmt::Debug for InvokeHandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeHandlerContext")
            .field("handler", &self.handler)
            .field("message_id", &self.message_id)
            .field("invocation_aborted", &self.is_invocation_aborted())
            .field("defer_called", &self.defer_called())
            .finish()
    }
}
