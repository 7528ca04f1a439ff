//! Typed errors for the JSON-RPC transport.

use std::time::Duration;

use thiserror::Error;

use crate::message::RpcError;

/// Failure of an outbound call or of the transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was severed (EOF, read error, or explicit close) while
    /// the call was outstanding, or before it could be written.
    #[error("connection lost while calling '{method}': {reason}")]
    ConnectionLost {
        /// Method of the call that was rejected.
        method: String,
        /// Why the transport went away.
        reason: String,
    },

    /// The remote side answered with a JSON-RPC error object.
    #[error("'{method}' failed: {error}")]
    Remote {
        /// Method of the failed call.
        method: String,
        /// Error object returned by the runtime.
        error: RpcError,
    },

    /// No response arrived within the per-call timeout.
    #[error("'{method}' timed out after {after:?}")]
    Timeout {
        /// Method of the call that timed out.
        method: String,
        /// Configured timeout.
        after: Duration,
    },

    /// A frame could not be serialized.
    #[error("failed to encode '{method}': {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// Writing a frame to the stream failed.
    #[error("failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the transport is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}
