//! Queued conversation turns with priorities.
//!
//! A [`ConversationManager`] accepts user messages immediately and feeds them
//! to a session one at a time from a background task, most urgent first.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::protocol::{Attachment, MessageOptions};
use crate::session::Session;

/// Default capacity of a [`MessageQueue`].
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Processing priority. Higher values are served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

/// The queue is at capacity.
#[derive(Debug, Clone, Error)]
#[error("Queue full (max={max_depth})")]
pub struct QueueFull {
    pub max_depth: usize,
}

/// A message waiting to be sent.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub request_id: String,
    pub content: String,
    pub priority: Priority,
    pub session_id: String,
    pub queued_at: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
    /// FIFO order within a priority. Assigned by the queue when zero.
    pub sequence_number: u64,
    pub attachments: Vec<Attachment>,
}

impl QueuedMessage {
    pub fn new(
        request_id: impl Into<String>,
        content: impl Into<String>,
        priority: Priority,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            priority,
            session_id: session_id.into(),
            queued_at: Utc::now(),
            metadata: HashMap::new(),
            sequence_number: 0,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serving order: `Less` means `self` is sent before `other`.
    pub fn serving_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.sequence_number.cmp(&other.sequence_number))
    }
}

/// Heap entry. The shutdown sentinel is served after every message.
#[derive(Debug)]
enum Entry {
    Message(QueuedMessage),
    Shutdown,
}

impl Entry {
    fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Message(a), Self::Message(b)) => a.serving_order(b),
            (Self::Message(_), Self::Shutdown) => Ordering::Less,
            (Self::Shutdown, Self::Message(_)) => Ordering::Greater,
            (Self::Shutdown, Self::Shutdown) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<Entry>>,
    messages: usize,
    next_sequence: u64,
    shutdown: bool,
}

/// Bounded priority queue with non-blocking `put` and blocking `get`.
pub struct MessageQueue {
    max_depth: usize,
    state: Mutex<QueueState>,
    available: Notify,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("max_depth", &self.max_depth)
            .field("qsize", &self.qsize())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl MessageQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            state: Mutex::new(QueueState {
                next_sequence: 1,
                ..Default::default()
            }),
            available: Notify::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Messages waiting, not counting the shutdown sentinel.
    pub fn qsize(&self) -> usize {
        self.state.lock().messages
    }

    pub fn empty(&self) -> bool {
        self.qsize() == 0
    }

    pub fn full(&self) -> bool {
        self.qsize() >= self.max_depth
    }

    /// Enqueue without waiting.
    pub fn put(&self, mut message: QueuedMessage) -> std::result::Result<(), QueueFull> {
        {
            let mut state = self.state.lock();
            if state.messages >= self.max_depth {
                return Err(QueueFull {
                    max_depth: self.max_depth,
                });
            }
            if message.sequence_number == 0 {
                message.sequence_number = state.next_sequence;
                state.next_sequence += 1;
            }
            state.heap.push(Reverse(Entry::Message(message)));
            state.messages += 1;
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next message. `None` once the shutdown sentinel is reached.
    pub async fn get(&self) -> Option<QueuedMessage> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(Reverse(entry)) = state.heap.pop() {
                    return match entry {
                        Entry::Message(message) => {
                            state.messages -= 1;
                            Some(message)
                        }
                        Entry::Shutdown => None,
                    };
                }
            }
            notified.await;
        }
    }

    /// Mark the queue as shutting down. Waiting and future `get` calls
    /// return `None` after the remaining messages.
    pub fn signal_shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.heap.push(Reverse(Entry::Shutdown));
        }
        self.available.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Drop every waiting message and return how many were removed.
    fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let cleared = state.messages;
        state.heap.retain(|Reverse(entry)| entry.is_shutdown());
        state.messages = 0;
        cleared
    }
}

// ---------------------------------------------------------------------------
// Conversation manager
// ---------------------------------------------------------------------------

/// Where queued messages are delivered.
#[async_trait]
pub trait MessageSink: Send + Sync {
    fn session_id(&self) -> &str;

    async fn send(&self, options: MessageOptions) -> Result<String>;
}

#[async_trait]
impl MessageSink for Session {
    fn session_id(&self) -> &str {
        self.id()
    }

    async fn send(&self, options: MessageOptions) -> Result<String> {
        Session::send(self, options).await
    }
}

struct Running {
    queue: Arc<MessageQueue>,
    processor: JoinHandle<()>,
}

/// Sends queued messages to a session in priority order.
///
/// The processor starts with the first queued message and runs until
/// [`ConversationManager::stop`].
pub struct ConversationManager {
    sink: Arc<dyn MessageSink>,
    max_depth: usize,
    running: Mutex<Option<Running>>,
    request_counter: AtomicU64,
}

impl std::fmt::Debug for ConversationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationManager")
            .field("session_id", &self.sink.session_id())
            .field("max_depth", &self.max_depth)
            .field("started", &self.is_started())
            .finish()
    }
}

impl ConversationManager {
    pub fn new(sink: impl MessageSink + 'static, max_depth: usize) -> Self {
        Self {
            sink: Arc::new(sink),
            max_depth,
            running: Mutex::new(None),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Messages waiting to be sent; zero when not started.
    pub fn queue_size(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.queue.qsize())
    }

    /// Queue a message and return its request id (`req-N` unless given).
    pub async fn queue_message(
        &self,
        content: impl Into<String>,
        priority: Priority,
        request_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> std::result::Result<String, QueueFull> {
        let request_id = request_id.unwrap_or_else(|| {
            let n = self.request_counter.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            format!("req-{n}")
        });
        let message = QueuedMessage::new(
            request_id.clone(),
            content,
            priority,
            self.sink.session_id(),
        )
        .with_attachments(attachments);

        let mut running = self.running.lock();
        let running = running.get_or_insert_with(|| self.start());
        running.queue.put(message)?;
        log::debug!("Queued {request_id} at priority {}", priority.as_str());
        Ok(request_id)
    }

    fn start(&self) -> Running {
        let queue = Arc::new(MessageQueue::new(self.max_depth));
        let processor = tokio::spawn(process_messages(
            Arc::clone(&queue),
            Arc::clone(&self.sink),
        ));
        log::debug!("Conversation processor started for {}", self.sink.session_id());
        Running { queue, processor }
    }

    /// Send what is queued, then stop the processor.
    ///
    /// With `timeout`, the processor is cancelled if it has not finished in
    /// time. A no-op when not started.
    pub async fn stop(&self, timeout: Option<Duration>) {
        let Some(Running {
            queue,
            mut processor,
        }) = self.running.lock().take()
        else {
            return;
        };
        queue.signal_shutdown();

        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, &mut processor).await.is_err() {
                    log::warn!(
                        "Conversation processor did not drain within {timeout:?}; cancelling"
                    );
                    processor.abort();
                    let _ = processor.await;
                }
            }
            None => {
                let _ = processor.await;
            }
        }
    }

    /// Drop every waiting message and return how many were removed.
    pub fn clear_queue(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.queue.clear())
    }
}

async fn process_messages(queue: Arc<MessageQueue>, sink: Arc<dyn MessageSink>) {
    while let Some(message) = queue.get().await {
        let options = MessageOptions::new(message.content).with_attachments(message.attachments);
        if let Err(e) = sink.send(options).await {
            log::error!("Error processing message {}: {e}", message.request_id);
        }
    }
    log::debug!("Conversation processor stopped for {}", sink.session_id());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, priority: Priority) -> QueuedMessage {
        QueuedMessage::new(id, "hello", priority, "session-1")
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(Priority::Low as u8, 0);
        assert_eq!(Priority::Urgent as u8, 3);
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_serving_order() {
        let urgent = message("u", Priority::Urgent);
        let low = message("l", Priority::Low);
        assert_eq!(urgent.serving_order(&low), Ordering::Less);

        let mut first = message("a", Priority::Normal);
        first.sequence_number = 1;
        let mut second = message("b", Priority::Normal);
        second.sequence_number = 2;
        assert_eq!(first.serving_order(&second), Ordering::Less);
        assert_eq!(second.serving_order(&first), Ordering::Greater);
    }

    #[test]
    fn test_sentinel_sorts_last() {
        let msg = Entry::Message(message("m", Priority::Low));
        assert!(msg < Entry::Shutdown);
        assert!(Entry::Shutdown > msg);
        assert_eq!(Entry::Shutdown, Entry::Shutdown);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let queue = MessageQueue::default();
        queue.put(message("test-1", Priority::Normal)).unwrap();
        assert_eq!(queue.qsize(), 1);
        let got = queue.get().await.unwrap();
        assert_eq!(got.request_id, "test-1");
        assert_eq!(got.sequence_number, 1);
        assert!(queue.empty());
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = MessageQueue::new(10);
        queue.put(message("low", Priority::Low)).unwrap();
        queue.put(message("normal-1", Priority::Normal)).unwrap();
        queue.put(message("urgent", Priority::Urgent)).unwrap();
        queue.put(message("normal-2", Priority::Normal)).unwrap();

        let mut order = Vec::new();
        while !queue.empty() {
            order.push(queue.get().await.unwrap().request_id);
        }
        assert_eq!(order, ["urgent", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = MessageQueue::new(2);
        assert!(!queue.full());
        queue.put(message("1", Priority::Normal)).unwrap();
        queue.put(message("2", Priority::Normal)).unwrap();
        assert!(queue.full());
        let err = queue.put(message("3", Priority::Normal)).unwrap_err();
        assert_eq!(err.to_string(), "Queue full (max=2)");
    }

    #[tokio::test]
    async fn test_shutdown_after_pending_messages() {
        let queue = MessageQueue::new(2);
        queue.put(message("1", Priority::Low)).unwrap();
        queue.put(message("2", Priority::Low)).unwrap();
        assert!(!queue.is_shutdown());
        queue.signal_shutdown();
        assert!(queue.is_shutdown());

        assert_eq!(queue.get().await.unwrap().request_id, "1");
        assert_eq!(queue.get().await.unwrap().request_id, "2");
        assert!(queue.get().await.is_none());
    }

    #[tokio::test]
    async fn test_get_wakes_on_put() {
        let queue = Arc::new(MessageQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.put(message("late", Priority::High)).unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.request_id, "late");
    }

    #[tokio::test]
    async fn test_clear_keeps_sentinel() {
        let queue = MessageQueue::default();
        queue.put(message("1", Priority::Normal)).unwrap();
        queue.signal_shutdown();
        assert_eq!(queue.clear(), 1);
        assert!(queue.get().await.is_none());
    }
}
