//! HTTP access to published releases, with native-tls and a host allowlist.

use std::io::{Read, Write};
use std::time::Duration;

use ureq::Agent;
use ureq::tls::{RootCerts, TlsConfig, TlsProvider};

/// Connect timeout for release downloads.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Global timeout for a whole download. Runtime archives are large.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Maximum size of a downloaded archive (512 MB).
pub const MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Maximum size of a checksum file (64 KB).
pub const MAX_CHECKSUM_SIZE: u64 = 64 * 1024;

const USER_AGENT: &str = concat!("copilot-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// Hostnames that serve GitHub release assets.
const ALLOWED_HOSTS: &[&str] = &[
    "github.com",
    "api.github.com",
    "objects.githubusercontent.com",
    "github-releases.githubusercontent.com",
    "release-assets.githubusercontent.com",
];

/// Validate that a URL is safe to download a runtime from.
///
/// The scheme must be HTTPS and the host must be a GitHub release host or
/// one of `extra_hosts` (the host of a configured mirror).
pub fn validate_release_url(url: &str, extra_hosts: &[String]) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;

    match parsed.scheme() {
        "https" => {}
        scheme => {
            return Err(format!(
                "Insecure URL scheme '{}' rejected; only HTTPS is allowed. URL: {}",
                scheme, url
            ));
        }
    }

    let host = parsed.host_str().unwrap_or("");
    if !ALLOWED_HOSTS.contains(&host) && !extra_hosts.iter().any(|h| h == host) {
        return Err(format!(
            "URL host '{}' is not in the allowed list for release downloads. \
             Allowed hosts: {}. URL: {}",
            host,
            ALLOWED_HOSTS.join(", "),
            url
        ));
    }

    Ok(())
}

/// Host of a URL, if it parses and has one.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Create an HTTP agent configured with native-tls and download timeouts.
pub fn agent() -> Agent {
    let tls_config = TlsConfig::builder()
        .provider(TlsProvider::NativeTls)
        .root_certs(RootCerts::PlatformVerifier)
        .build();

    Agent::config_builder()
        .tls_config(tls_config)
        .timeout_connect(Some(CONNECT_TIMEOUT))
        .timeout_global(Some(DOWNLOAD_TIMEOUT))
        .build()
        .into()
}

/// A failed fetch: the HTTP status if one was received, plus a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub status: Option<u16>,
    pub cause: String,
}

impl FetchError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            status: None,
            cause: cause.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            cause: format!("server responded with HTTP {}", status),
        }
    }
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::status(code),
            other => Self::new(other.to_string()),
        }
    }
}

/// Source of release archives. Blocking; called from a blocking worker.
pub trait ReleaseFetcher: Send + Sync {
    /// Stream `url` into `dest`, reporting `(bytes_so_far, total)` as it goes.
    /// Returns the number of bytes written.
    fn fetch_to(
        &self,
        url: &str,
        dest: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, FetchError>;

    /// Fetch a small text document. `Ok(None)` when the server has none (404).
    fn fetch_text(&self, url: &str) -> Result<Option<String>, FetchError>;
}

/// [`ReleaseFetcher`] backed by `ureq`.
pub struct HttpFetcher {
    agent: Agent,
    extra_hosts: Vec<String>,
}

impl HttpFetcher {
    pub fn new(extra_hosts: Vec<String>) -> Self {
        Self {
            agent: agent(),
            extra_hosts,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ReleaseFetcher for HttpFetcher {
    fn fetch_to(
        &self,
        url: &str,
        dest: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, FetchError> {
        validate_release_url(url, &self.extra_hosts).map_err(FetchError::new)?;

        let response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()?;
        let mut body = response.into_body();
        let total = body.content_length();
        let mut reader = body.with_config().limit(MAX_DOWNLOAD_SIZE).reader();

        let mut buf = vec![0u8; 64 * 1024];
        let mut written: u64 = 0;
        progress(0, total);
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| FetchError::new(format!("read failed: {}", e)))?;
            if n == 0 {
                break;
            }
            dest.write_all(&buf[..n])
                .map_err(|e| FetchError::new(format!("write failed: {}", e)))?;
            written += n as u64;
            progress(written, total);
        }
        dest.flush()
            .map_err(|e| FetchError::new(format!("write failed: {}", e)))?;
        Ok(written)
    }

    fn fetch_text(&self, url: &str) -> Result<Option<String>, FetchError> {
        validate_release_url(url, &self.extra_hosts).map_err(FetchError::new)?;

        let response = match self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = response
            .into_body()
            .with_config()
            .limit(MAX_CHECKSUM_SIZE)
            .read_to_string()
            .map_err(|e| FetchError::new(format!("read failed: {}", e)))?;
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_release_download() {
        assert!(
            validate_release_url(
                "https://github.com/github/copilot-cli/releases/download/v0.0.363/copilot-linux-x64.tar.gz",
                &[]
            )
            .is_ok()
        );
    }

    #[test]
    fn test_valid_release_asset_cdn() {
        assert!(
            validate_release_url(
                "https://objects.githubusercontent.com/github-production-release-asset/1/abc",
                &[]
            )
            .is_ok()
        );
    }

    #[test]
    fn test_rejected_http_scheme() {
        let msg = validate_release_url("http://github.com/github/copilot-cli", &[]).unwrap_err();
        assert!(msg.contains("http"), "should mention the bad scheme: {msg}");
        assert!(msg.contains("HTTPS"), "should mention HTTPS: {msg}");
    }

    #[test]
    fn test_rejected_unknown_host() {
        let msg = validate_release_url("https://evil.example.com/copilot.tar.gz", &[]).unwrap_err();
        assert!(msg.contains("evil.example.com"), "should name the host: {msg}");
        assert!(msg.contains("allowed list"), "should mention allowlist: {msg}");
    }

    #[test]
    fn test_rejected_lookalike_host() {
        assert!(validate_release_url("https://fake.github.com/releases", &[]).is_err());
    }

    #[test]
    fn test_extra_host_allowed() {
        let extra = vec!["mirror.internal.example".to_string()];
        assert!(
            validate_release_url("https://mirror.internal.example/v1.0.0/a.tar.gz", &extra).is_ok()
        );
        assert!(
            validate_release_url("http://mirror.internal.example/v1.0.0/a.tar.gz", &extra).is_err()
        );
    }

    #[test]
    fn test_rejected_invalid_url() {
        let msg = validate_release_url("not a url", &[]).unwrap_err();
        assert!(msg.contains("Invalid URL"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://mirror.example.com/releases").as_deref(),
            Some("mirror.example.com")
        );
        assert_eq!(host_of("garbage"), None);
    }

    #[test]
    fn test_fetch_error_from_status() {
        let err = FetchError::from(ureq::Error::StatusCode(404));
        assert_eq!(err.status, Some(404));
        assert!(err.cause.contains("404"));
    }
}
