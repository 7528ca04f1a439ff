//! copilot-sdk-acquire: locate, version-match, download and install the Copilot CLI.
//!
//! - [`acquirer`] - the acquisition walk and [`CompatibilityProbe`] seam
//! - [`platform`] - release asset naming per OS/architecture
//! - [`http`] - HTTPS fetching with a host allowlist
//! - [`archive`] - tar.gz/zip extraction and executable lookup
//! - [`install`] - version directory layout and cleanup
//! - [`checksum`] - SHA-256 verification

pub mod acquirer;
pub mod archive;
pub mod checksum;
pub mod error;
pub mod http;
pub mod install;
pub mod platform;

pub use acquirer::{
    AcquireOptions, Acquirer, AcquisitionRecord, CompatibilityProbe, DownloadProgress,
    PREFERRED_CLI_VERSION, ProgressCallback,
};
pub use error::AcquireError;
pub use http::{FetchError, HttpFetcher, ReleaseFetcher};
pub use platform::{ArchiveKind, DEFAULT_RELEASE_BASE_URL, Platform};
