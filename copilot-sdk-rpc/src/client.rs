//! Bidirectional JSON-RPC 2.0 client.
//!
//! Outbound calls are correlated with their responses through a pending-call
//! table; everything else the runtime sends (notifications and calls it
//! initiates) is forwarded, in arrival order, to a channel handed out once by
//! [`RpcClient::take_incoming`].
//!
//! All writes go through a single writer task. Callers enqueue whole encoded
//! frames and only await the outcome, so a frame that has been queued is
//! always written completely even if the caller is cancelled mid-call.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

use crate::codec::Framing;
use crate::error::TransportError;
use crate::message::{IncomingMessage, Request, RequestId, Response, RpcError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type CallOutcome = Result<Response, TransportError>;

/// How long `close` waits for queued frames to drain before abandoning them.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// An outbound call awaiting its response.
struct PendingCall {
    method: String,
    submitted: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

/// Pending calls plus the reason the transport closed, guarded together so
/// that no call can be registered after the table has been drained.
#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    closed: Option<String>,
}

struct Shared {
    pending: Mutex<PendingTable>,
    closed_tx: watch::Sender<Option<String>>,
}

impl Shared {
    /// Reject every outstanding call and refuse new ones.
    fn fail_all(&self, reason: &str) {
        let drained: Vec<(u64, PendingCall)> = {
            let mut table = self.pending.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.calls.drain().collect()
        };

        if !drained.is_empty() {
            log::warn!(
                "JSON-RPC transport closed ({reason}); rejecting {} pending call(s)",
                drained.len()
            );
        }
        for (_, call) in drained {
            let _ = call.tx.send(Err(TransportError::ConnectionLost {
                method: call.method,
                reason: reason.to_string(),
            }));
        }
        self.closed_tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason.to_string());
                true
            } else {
                false
            }
        });
    }
}

/// Removes a call from the pending table when the request future finishes or
/// is dropped, so abandoned calls never accumulate.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().calls.remove(&self.id);
    }
}

/// Work item for the writer task.
enum WriterCommand {
    Frame {
        bytes: Vec<u8>,
        done: oneshot::Sender<io::Result<()>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// A JSON-RPC 2.0 client over an arbitrary byte stream (child stdio or TCP).
pub struct RpcClient {
    /// Queue feeding the writer task, which owns the write half.
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    writer_task: AbortHandle,
    framing: Framing,
    /// Monotonically increasing request id counter.
    next_id: AtomicU64,
    shared: Arc<Shared>,
    closed_rx: watch::Receiver<Option<String>>,
    reader_task: AbortHandle,
    /// Receiver side, handed out exactly once via `take_incoming()`.
    incoming_rx: Option<mpsc::UnboundedReceiver<IncomingMessage>>,
}

impl RpcClient {
    /// Create a client using `Content-Length` framing.
    ///
    /// Spawns a background task that reads frames from `reader`, routing
    /// responses to their pending futures and everything else to the
    /// incoming channel, plus a task that owns `writer`.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_framing(reader, writer, Framing::ContentLength)
    }

    /// Create a client with an explicit framing.
    pub fn with_framing<R, W>(reader: R, writer: W, framing: Framing) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, closed_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            closed_tx,
        });
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<IncomingMessage>();

        let reader_shared = Arc::clone(&shared);
        let reader_handle = tokio::spawn(async move {
            let reason = read_loop(reader, framing, &reader_shared, incoming_tx).await;
            reader_shared.fail_all(&reason);
        });

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer_handle = tokio::spawn(write_loop(Box::new(writer), writer_rx));

        Self {
            writer_tx,
            writer_task: writer_handle.abort_handle(),
            framing,
            next_id: AtomicU64::new(1),
            shared,
            closed_rx,
            reader_task: reader_handle.abort_handle(),
            incoming_rx: Some(incoming_rx),
        }
    }

    /// Take the receiver for incoming notifications and RPC calls.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<IncomingMessage>> {
        self.incoming_rx.take()
    }

    /// Send a request and wait for the matching response.
    ///
    /// With `timeout` set, the pending entry is dropped when it elapses and a
    /// late response is discarded as stale. Dropping the returned future has
    /// the same effect; a frame already queued is still written in full.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<CallOutcome>();

        // Register the pending request before writing to avoid races.
        {
            let mut table = self.shared.pending.lock();
            if let Some(reason) = &table.closed {
                return Err(TransportError::ConnectionLost {
                    method: method.to_string(),
                    reason: reason.clone(),
                });
            }
            table.calls.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    submitted: Instant::now(),
                    tx,
                },
            );
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let json = serde_json::to_string(&Request::call(id, method, params)).map_err(|source| {
            TransportError::Encode {
                method: method.to_string(),
                source,
            }
        })?;

        log::debug!("JSON-RPC -> {method} id={id}");
        let exchange = async {
            if let Err(e) = self.write(&json).await {
                return Err(TransportError::ConnectionLost {
                    method: method.to_string(),
                    reason: format!("write failed: {e}"),
                });
            }
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::ConnectionLost {
                    method: method.to_string(),
                    reason: "response slot dropped".to_string(),
                }),
            }
        };

        let response = match timeout {
            Some(after) => tokio::time::timeout(after, exchange).await.map_err(|_| {
                TransportError::Timeout {
                    method: method.to_string(),
                    after,
                }
            })??,
            None => exchange.await?,
        };

        response
            .into_result()
            .map_err(|error| TransportError::Remote {
                method: method.to_string(),
                error,
            })
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let json = serde_json::to_string(&Request::notification(method, params)).map_err(
            |source| TransportError::Encode {
                method: method.to_string(),
                source,
            },
        )?;
        self.write(&json).await?;
        Ok(())
    }

    /// Answer a call initiated by the runtime.
    pub async fn respond(
        &self,
        id: RequestId,
        outcome: Result<Value, RpcError>,
    ) -> Result<(), TransportError> {
        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(id, error),
        };
        let json = serde_json::to_string(&response).map_err(|source| TransportError::Encode {
            method: "<response>".to_string(),
            source,
        })?;
        self.write(&json).await?;
        Ok(())
    }

    /// Number of outbound calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().calls.len()
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed_rx.borrow().is_some()
    }

    /// Wait until the transport closes and return the reason.
    pub async fn closed(&self) -> String {
        let mut rx = self.closed_rx.clone();
        match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => state.clone().unwrap_or_default(),
            Err(_) => "transport dropped".to_string(),
        }
    }

    /// Close the transport: stop reading, reject every pending call and shut
    /// down the write half once queued frames have drained.
    pub async fn close(&self, reason: &str) {
        self.reader_task.abort();
        self.shared.fail_all(reason);

        let (done, drained) = oneshot::channel();
        if self.writer_tx.send(WriterCommand::Shutdown { done }).is_err() {
            return;
        }
        if tokio::time::timeout(WRITER_DRAIN_GRACE, drained).await.is_err() {
            log::warn!("JSON-RPC writer did not drain within {WRITER_DRAIN_GRACE:?}; aborting");
            self.writer_task.abort();
        }
    }

    /// Queue one encoded frame and wait until the writer task has flushed it.
    async fn write(&self, json: &str) -> io::Result<()> {
        let (done, written) = oneshot::channel();
        let command = WriterCommand::Frame {
            bytes: self.framing.encode(json),
            done,
        };
        if self.writer_tx.send(command).is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"));
        }
        written
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Own the write half; write each queued frame to completion in order.
async fn write_loop(mut writer: BoxedWriter, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame { bytes, done } => {
                let result = match writer.write_all(&bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    log::debug!("JSON-RPC write failed: {e}");
                }
                let _ = done.send(result);
            }
            WriterCommand::Shutdown { done } => {
                if let Err(e) = writer.shutdown().await {
                    log::debug!("JSON-RPC writer shutdown: {e}");
                }
                let _ = done.send(());
                return;
            }
        }
    }
}

/// Read frames until the stream ends; returns why reading stopped.
async fn read_loop<R>(
    reader: R,
    framing: Framing,
    shared: &Shared,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let body = match framing.read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => return "stream closed by runtime".to_string(),
            Err(e) => {
                log::error!("Error reading JSON-RPC stream: {e}");
                return format!("read error: {e}");
            }
        };

        let msg: IncomingMessage = match serde_json::from_str(&body) {
            Ok(m) => m,
            Err(e) => {
                log::error!("Failed to parse JSON-RPC message: {e}");
                continue;
            }
        };

        if msg.is_response() {
            route_response(shared, msg);
        } else if msg.method.is_some() {
            // Notification or incoming RPC call.
            if incoming_tx.send(msg).is_err() {
                log::debug!("Incoming receiver dropped; discarding inbound message");
            }
        } else {
            log::error!("Received unclassifiable JSON-RPC frame: {body}");
        }
    }
}

fn route_response(shared: &Shared, msg: IncomingMessage) {
    let Some(id) = msg.id.as_ref().and_then(RequestId::as_u64) else {
        log::debug!("Discarding response with non-numeric id {:?}", msg.id);
        return;
    };

    let call = shared.pending.lock().calls.remove(&id);
    match call {
        Some(call) => {
            log::debug!(
                "JSON-RPC <- {} id={id} after {:?}",
                call.method,
                call.submitted.elapsed()
            );
            let _ = call.tx.send(Ok(msg.into_response()));
        }
        None => log::debug!("Discarding stale response for request id {id}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
