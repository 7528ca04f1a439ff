//! Typed errors for runtime acquisition.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving, downloading or installing a runtime.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Caller mistake: reserved download directory, malformed version, bad URL.
    #[error("invalid acquisition configuration: {0}")]
    Configuration(String),

    /// The current OS/architecture has no published runtime build.
    #[error("unsupported platform: {os} {arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The release could not be downloaded.
    #[error("failed to download Copilot CLI {version} from {url}: {cause}")]
    Download {
        /// Version being downloaded.
        version: String,
        /// Asset URL.
        url: String,
        /// HTTP status, when the server answered with one.
        status: Option<u16>,
        /// Human-readable cause.
        cause: String,
    },

    /// The downloaded archive did not match its published SHA-256.
    #[error("checksum mismatch for Copilot CLI {version}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        version: String,
        expected: String,
        actual: String,
    },

    /// The archive could not be unpacked.
    #[error("failed to extract {archive}: {cause}")]
    Extract { archive: PathBuf, cause: String },

    /// The archive unpacked fine but holds no executable with the expected name.
    #[error("executable '{name}' not found in the Copilot CLI {version} archive")]
    ExecutableNotFound { version: String, name: String },

    /// A filesystem step of the installation failed.
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("acquisition task failed: {0}")]
    Task(String),
}

impl AcquireError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
