//! Typed error types for copilot-sdk.
//!
//! Every public operation returns [`Result`]; callers can match on the
//! category of failure instead of parsing messages.

use std::path::PathBuf;
use std::time::Duration;

use copilot_sdk_acquire::AcquireError;
use copilot_sdk_rpc::{RpcError, TransportError};
use thiserror::Error;

/// Shorthand for results of SDK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user-supplied handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the SDK.
#[derive(Debug, Error)]
pub enum Error {
    // -----------------------------------------------------------------------
    // Caller mistakes
    // -----------------------------------------------------------------------
    /// Invalid options, reserved paths, malformed versions or tool definitions.
    #[error("{0}")]
    Configuration(String),

    // -----------------------------------------------------------------------
    // Runtime provisioning
    // -----------------------------------------------------------------------
    /// The runtime could not be downloaded or installed.
    #[error(transparent)]
    Acquisition(AcquireError),

    /// The runtime process could not be started or never became ready.
    #[error(transparent)]
    ProcessLaunch(#[from] ProcessLaunchError),

    // -----------------------------------------------------------------------
    // Protocol
    // -----------------------------------------------------------------------
    /// The runtime rejected a call or spoke an incompatible protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The runtime answered `method` with a JSON-RPC error object.
    #[error("'{method}' failed: {error}")]
    Rpc { method: String, error: RpcError },

    /// The transport was severed while the call was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response within the configured timeout.
    #[error("'{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    // -----------------------------------------------------------------------
    // Sessions and tools
    // -----------------------------------------------------------------------
    /// The session was destroyed, locally or by the runtime.
    #[error("session '{0}' is closed")]
    SessionClosed(String),

    /// A tool handler failed. Only delivered to tool error handlers.
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    /// No connection and `auto_start` is off.
    #[error("client is not connected; call start() first")]
    NotConnected,
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionLost { method, reason } => {
                Self::ConnectionLost(format!("'{method}': {reason}"))
            }
            TransportError::Remote { method, error } => Self::Rpc { method, error },
            TransportError::Timeout { method, after } => Self::Timeout { method, after },
            TransportError::Encode { method, source } => {
                Self::Protocol(format!("failed to encode '{method}': {source}"))
            }
            TransportError::Io(e) => Self::ConnectionLost(e.to_string()),
        }
    }
}

impl From<AcquireError> for Error {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Acquisition(other),
        }
    }
}

/// Failure to bring up the runtime process.
#[derive(Debug, Error)]
pub enum ProcessLaunchError {
    /// The executable does not exist. No process was created.
    #[error("Copilot CLI not found at {}", path.display())]
    NotFound { path: PathBuf },

    /// The OS refused to spawn the executable.
    #[error("failed to spawn Copilot CLI {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process exited before it became ready.
    #[error("process exited immediately (code {code:?}): {stderr}")]
    ExitedImmediately { code: Option<i32>, stderr: String },

    /// The process did not become ready in time. It has been killed.
    #[error("timed out waiting for server readiness after {after:?}: {stderr}")]
    HandshakeTimeout { after: Duration, stderr: String },

    /// TCP mode: the process did not announce a usable port.
    #[error("could not determine server port: {0}")]
    PortAnnouncement(String),
}

/// A tool handler returned an error or panicked.
///
/// The detail stays local: the runtime only ever sees a generic failure.
#[derive(Debug, Clone, Error)]
#[error("tool '{tool_name}' (call {tool_call_id}) in session {session_id} failed: {message}")]
pub struct ToolExecutionError {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub message: String,
    /// Whether the handler panicked rather than returning an error.
    pub panicked: bool,
}
