//! Live sessions: RPC wrappers, event subscribers and the closed flag.
//!
//! A [`Session`] is a cheap handle around shared state that the router and
//! the callback bridge also reach through the client's session registry.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use copilot_sdk_rpc::RpcClient;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::handlers::{EventHandler, SessionHandlers};
use crate::protocol::{
    GetMessagesResult, MessageOptions, SendResult, SessionEvent, SessionEventType,
};
use crate::tools::Tool;

/// Sessions of one connection, keyed by id.
pub(crate) type SessionRegistry = Arc<RwLock<HashMap<String, Arc<SessionInner>>>>;

/// Handle returned by [`Session::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) struct SessionInner {
    id: String,
    workspace_path: Option<PathBuf>,
    rpc: Arc<RpcClient>,
    request_timeout: Option<Duration>,
    tools: Arc<HashMap<String, Tool>>,
    handlers: SessionHandlers,
    subscribers: Mutex<Vec<(SubscriptionId, EventHandler)>>,
    next_subscription: AtomicU64,
    closed: watch::Sender<bool>,
    registry: Weak<RwLock<HashMap<String, Arc<SessionInner>>>>,
}

impl SessionInner {
    pub(crate) fn new(
        id: String,
        workspace_path: Option<PathBuf>,
        rpc: Arc<RpcClient>,
        request_timeout: Option<Duration>,
        tools: Arc<HashMap<String, Tool>>,
        handlers: SessionHandlers,
        registry: &SessionRegistry,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id,
            workspace_path,
            rpc,
            request_timeout,
            tools,
            handlers,
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            closed,
            registry: Arc::downgrade(registry),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub(crate) fn handlers(&self) -> &SessionHandlers {
        &self.handlers
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Mark the session terminal. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        let changed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if changed {
            log::info!("Session {} closed", self.id);
        }
        changed
    }

    /// Remove this session from the registry if the entry is still ours.
    pub(crate) fn unregister(self: &Arc<Self>) {
        if let Some(registry) = self.registry.upgrade() {
            let mut sessions = registry.write();
            if sessions
                .get(&self.id)
                .is_some_and(|entry| Arc::ptr_eq(entry, self))
            {
                sessions.remove(&self.id);
            }
        }
    }

    /// Resolves once the session is closed.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Deliver an event to every subscriber in registration order.
    ///
    /// The list is snapshotted first so a subscriber may call `on`/`off`.
    pub(crate) fn dispatch(&self, event: &SessionEvent) {
        let snapshot: Vec<(SubscriptionId, EventHandler)> = self.subscribers.lock().clone();
        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!(
                    "Session {}: subscriber {:?} panicked on {}",
                    self.id,
                    id,
                    event.event_type.as_str()
                );
            }
        }
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.ensure_open()?;
        let value = self
            .rpc
            .request(method, Some(params), self.request_timeout)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("invalid '{method}' result: {e}")))
    }
}

/// A conversation with the runtime.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("workspace_path", &self.inner.workspace_path)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Workspace directory of an infinite session, if the runtime reported one.
    pub fn workspace_path(&self) -> Option<&Path> {
        self.inner.workspace_path.as_deref()
    }

    /// Whether the session was destroyed, locally or by the runtime.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Send a message and return its id without waiting for the reply.
    pub async fn send(&self, options: impl Into<MessageOptions>) -> Result<String> {
        let options = options.into();
        let mut params = serde_json::to_value(&options)
            .map_err(|e| Error::Protocol(format!("failed to encode message: {e}")))?;
        if let Value::Object(map) = &mut params {
            map.insert("sessionId".to_string(), Value::String(self.inner.id.clone()));
        }
        let result: SendResult = self.inner.call("session.send", params).await?;
        Ok(result.message_id)
    }

    /// Send a message and wait until the session goes idle.
    ///
    /// Returns the last `assistant.message` event of the turn, if any.
    /// `Duration::ZERO` waits without a deadline. A `session.error` event
    /// fails the wait with [`Error::Protocol`].
    pub async fn send_and_wait(
        &self,
        options: impl Into<MessageOptions>,
        timeout: Duration,
    ) -> Result<Option<SessionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel::<SessionEvent>();
        let subscription = self.on(move |event| {
            let _ = tx.send(event.clone());
        });

        let outcome = if timeout.is_zero() {
            self.send_and_collect(options.into(), rx).await
        } else {
            match tokio::time::timeout(timeout, self.send_and_collect(options.into(), rx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout {
                    method: "session.send_and_wait".to_string(),
                    after: timeout,
                }),
            }
        };
        self.off(subscription);
        outcome
    }

    async fn send_and_collect(
        &self,
        options: MessageOptions,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<Option<SessionEvent>> {
        self.send(options).await?;
        let mut last_message = None;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(Error::SessionClosed(self.inner.id.clone()));
                    };
                    match &event.event_type {
                        SessionEventType::AssistantMessage => last_message = Some(event),
                        SessionEventType::SessionIdle => return Ok(last_message),
                        SessionEventType::SessionError => {
                            return Err(Error::Protocol(format!(
                                "session error: {}",
                                event.message().unwrap_or("unknown error")
                            )));
                        }
                        _ => {}
                    }
                }
                _ = self.inner.cancelled() => {
                    return Err(Error::SessionClosed(self.inner.id.clone()));
                }
            }
        }
    }

    /// Full event history of the session.
    pub async fn get_messages(&self) -> Result<Vec<SessionEvent>> {
        let result: GetMessagesResult = self
            .inner
            .call("session.getMessages", json!({"sessionId": self.inner.id}))
            .await?;
        Ok(result.events)
    }

    /// Abort the turn currently being processed.
    pub async fn abort(&self) -> Result<()> {
        let _: Value = self
            .inner
            .call("session.abort", json!({"sessionId": self.inner.id}))
            .await?;
        Ok(())
    }

    /// Destroy the session on the runtime and mark this handle terminal.
    ///
    /// The handle is terminal even if the call fails; in-flight tool calls of
    /// the session are resolved as denied.
    pub async fn destroy(&self) -> Result<()> {
        let result: Result<Value> = self
            .inner
            .call("session.destroy", json!({"sessionId": self.inner.id}))
            .await;
        if matches!(result, Err(Error::SessionClosed(_))) {
            return result.map(|_| ());
        }
        self.inner.mark_closed();
        self.inner.unregister();
        result.map(|_| ())
    }

    /// Subscribe to every event of this session.
    ///
    /// Handlers run on the router task in arrival order and should return
    /// quickly.
    pub fn on<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(Arc::new(handler))
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn detached_session(id: &str) -> (Session, SessionRegistry) {
        let (client_io, _server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_io);
        let rpc = Arc::new(RpcClient::new(reader, writer));
        let registry: SessionRegistry = Arc::new(RwLock::new(HashMap::new()));
        let inner = SessionInner::new(
            id.to_string(),
            None,
            rpc,
            None,
            Arc::new(HashMap::new()),
            SessionHandlers::default(),
            &registry,
        );
        registry.write().insert(id.to_string(), Arc::clone(&inner));
        (Session::from_inner(inner), registry)
    }

    fn event(event_type: &str) -> SessionEvent {
        serde_json::from_value(json!({"id": "e", "timestamp": "t", "type": event_type, "data": {}}))
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribers_called_in_order() {
        let (session, _registry) = detached_session("s1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            session.on(move |_event| seen.lock().push(tag));
        }
        session.inner.dispatch(&event("session.idle"));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_isolated() {
        let (session, _registry) = detached_session("s1");
        let count = Arc::new(AtomicUsize::new(0));
        session.on(|_event| panic!("subscriber bug"));
        let c = Arc::clone(&count);
        session.on(move |_event| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        session.inner.dispatch(&event("assistant.message"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_off_stops_delivery() {
        let (session, _registry) = detached_session("s1");
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = session.on(move |_event| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(session.off(id));
        assert!(!session.off(id));
        session.inner.dispatch(&event("session.idle"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let (session, registry) = detached_session("s1");
        assert!(session.inner.mark_closed());
        assert!(!session.inner.mark_closed());
        session.inner.unregister();
        assert!(registry.read().is_empty());

        assert!(matches!(session.send("hi").await, Err(Error::SessionClosed(_))));
        assert!(matches!(session.abort().await, Err(Error::SessionClosed(_))));
        assert!(matches!(session.destroy().await, Err(Error::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_close() {
        let (session, _registry) = detached_session("s1");
        let inner = Arc::clone(&session.inner);
        let waiter = tokio::spawn(async move { inner.cancelled().await });
        session.inner.mark_closed();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
