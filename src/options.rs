//! Client configuration.
//!
//! [`ClientOptions`] can be built in code, deserialized from TOML, and
//! overridden from `COPILOT_*` environment variables. [`ClientOptions::validate`]
//! runs before any process is spawned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use copilot_sdk_acquire::{AcquireOptions, DownloadProgress, ProgressCallback};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default time allowed for the runtime to become ready.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Log level passed to the runtime's `--log-level`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    All,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::All => "all",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "all" => Ok(Self::All),
            other => Err(Error::Configuration(format!("Invalid log level '{other}'"))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to find (or put) a downloaded runtime when `cli_path` is not set.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionOptions {
    /// Managed directory for `copilot-<version>` installs.
    /// Defaults to `<data_local_dir>/copilot-sdk/cli`.
    pub download_dir: Option<PathBuf>,
    /// Lowest acceptable runtime version.
    pub min_version: Option<String>,
    /// Alternative release mirror.
    pub release_base_url: Option<String>,
    /// Keep other version directories after acquiring.
    pub skip_cleanup: bool,
    /// Receives `{bytes_downloaded, total_bytes}` while an archive downloads.
    #[serde(skip)]
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for AcquisitionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionOptions")
            .field("download_dir", &self.download_dir)
            .field("min_version", &self.min_version)
            .field("release_base_url", &self.release_base_url)
            .field("skip_cleanup", &self.skip_cleanup)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl AcquisitionOptions {
    /// Report download progress to `callback`. Called from a blocking worker thread.
    pub fn with_download_progress(
        mut self,
        callback: impl Fn(DownloadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn resolved_download_dir(&self) -> Result<PathBuf> {
        match &self.download_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|d| d.join("copilot-sdk").join("cli"))
                .ok_or_else(|| {
                    Error::Configuration(
                        "no local data directory; set acquisition.download_dir".to_string(),
                    )
                }),
        }
    }

    /// Options for the runtime acquirer.
    pub fn acquire_options(&self) -> Result<AcquireOptions> {
        let mut options =
            AcquireOptions::new(self.resolved_download_dir()?).skip_cleanup(self.skip_cleanup);
        options.min_version = self.min_version.clone();
        options.release_base_url = self.release_base_url.clone();
        options.progress = self.progress.clone();
        Ok(options)
    }
}

/// How the client reaches the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Spawn the runtime and talk over its stdin/stdout.
    Stdio,
    /// Spawn the runtime with `--port` (0 lets it choose) and connect over TCP.
    Tcp { port: u16 },
    /// Connect to an already-running server; nothing is spawned.
    External { host: String, port: u16 },
}

/// Options for [`crate::Client`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Runtime executable. Resolved on `PATH` as `copilot` when unset.
    pub cli_path: Option<PathBuf>,
    /// Extra arguments placed before the SDK's own flags.
    pub cli_args: Vec<String>,
    /// Working directory of the runtime process.
    pub cwd: Option<PathBuf>,
    /// TCP port for the spawned runtime; 0 lets it choose.
    pub port: u16,
    /// Use stdio. Defaults to true unless `cli_url` is set.
    pub use_stdio: Option<bool>,
    /// Address of an external server: `"8080"`, `"host:port"` or `"http(s)://host:port"`.
    pub cli_url: Option<String>,
    pub log_level: LogLevel,
    /// Start the client on first use.
    pub auto_start: bool,
    /// Restart the runtime if it exits unexpectedly.
    pub auto_restart: bool,
    /// Extra environment for the runtime process.
    pub env: HashMap<String, String>,
    /// Token handed to the runtime through `COPILOT_SDK_AUTH_TOKEN`.
    pub github_token: Option<String>,
    /// Let the runtime use the stored login. Defaults to `github_token.is_none()`.
    pub use_logged_in_user: Option<bool>,
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,
    /// Per-call timeout for client-initiated requests.
    #[serde(with = "opt_duration_secs")]
    pub request_timeout: Option<Duration>,
    /// Download a runtime when `cli_path` is unset.
    pub acquisition: Option<AcquisitionOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cli_path: None,
            cli_args: Vec::new(),
            cwd: None,
            port: 0,
            use_stdio: None,
            cli_url: None,
            log_level: LogLevel::default(),
            auto_start: true,
            auto_restart: true,
            env: HashMap::new(),
            github_token: None,
            use_logged_in_user: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: None,
            acquisition: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("cli_path", &self.cli_path)
            .field("cli_args", &self.cli_args)
            .field("cwd", &self.cwd)
            .field("port", &self.port)
            .field("use_stdio", &self.use_stdio)
            .field("cli_url", &self.cli_url)
            .field("log_level", &self.log_level)
            .field("auto_start", &self.auto_start)
            .field("auto_restart", &self.auto_restart)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("use_logged_in_user", &self.use_logged_in_user)
            .field("startup_timeout", &self.startup_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("acquisition", &self.acquisition)
            .finish()
    }
}

impl ClientOptions {
    /// Parse options from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Invalid client options: {e}")))
    }

    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `COPILOT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `COPILOT_*` overrides from an arbitrary lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("COPILOT_CLI_URL") {
            self.cli_url = Some(url);
        }
        if self.cli_url.is_none()
            && let Some(path) = get("COPILOT_CLI_PATH")
        {
            self.cli_path = Some(PathBuf::from(path));
        }
        if let Some(args) = get("COPILOT_CLI_ARGS") {
            self.cli_args = shell_words::split(&args).map_err(|e| {
                Error::Configuration(format!("Invalid COPILOT_CLI_ARGS '{args}': {e}"))
            })?;
        }
        if let Some(level) = get("COPILOT_LOG_LEVEL") {
            self.log_level = level.parse()?;
        }
        let download_dir = get("COPILOT_SDK_DOWNLOAD_DIR");
        let min_version = get("COPILOT_SDK_MIN_VERSION");
        if download_dir.is_some() || min_version.is_some() {
            let acquisition = self.acquisition.get_or_insert_with(AcquisitionOptions::default);
            if let Some(dir) = download_dir {
                acquisition.download_dir = Some(PathBuf::from(dir));
            }
            if let Some(version) = min_version {
                acquisition.min_version = Some(version);
            }
        }
        Ok(())
    }

    /// Check option combinations. Run by [`crate::Client::new`].
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.cli_url {
            if self.use_stdio == Some(true) || self.cli_path.is_some() {
                return Err(Error::Configuration(
                    "cli_url is mutually exclusive with use_stdio and cli_path".to_string(),
                ));
            }
            if self.github_token.is_some() || self.use_logged_in_user.is_some() {
                return Err(Error::Configuration(
                    "github_token and use_logged_in_user cannot be used with cli_url \
                     (external server manages its own auth)"
                        .to_string(),
                ));
            }
            parse_cli_url(url)?;
        }
        if self.startup_timeout.is_zero() {
            return Err(Error::Configuration(
                "startup_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the runtime should use its stored login.
    pub fn effective_use_logged_in_user(&self) -> bool {
        self.use_logged_in_user
            .unwrap_or(self.github_token.is_none())
    }

    /// Whether the runtime is spawned with `--stdio`.
    pub fn uses_stdio(&self) -> bool {
        self.cli_url.is_none() && self.use_stdio.unwrap_or(true)
    }

    /// Whether the client connects to a server it does not own.
    pub fn is_external_server(&self) -> bool {
        self.cli_url.is_some()
    }

    /// Resolve the transport endpoint.
    pub fn endpoint(&self) -> Result<Endpoint> {
        if let Some(url) = &self.cli_url {
            let (host, port) = parse_cli_url(url)?;
            return Ok(Endpoint::External { host, port });
        }
        if self.uses_stdio() {
            Ok(Endpoint::Stdio)
        } else {
            Ok(Endpoint::Tcp { port: self.port })
        }
    }
}

/// Parse a `cli_url` into host and port.
///
/// Accepts `"8080"`, `"host:port"` and `"http(s)://host:port"`. The host
/// defaults to `localhost`.
pub fn parse_cli_url(url: &str) -> Result<(String, u16)> {
    let clean = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    let (host, port) = if !clean.is_empty() && clean.chars().all(|c| c.is_ascii_digit()) {
        ("localhost", clean)
    } else {
        let parts: Vec<&str> = clean.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::Configuration(format!(
                "Invalid cli_url format: {url}. Expected 'host:port', 'http://host:port', or 'port'"
            )));
        }
        let host = if parts[0].is_empty() {
            "localhost"
        } else {
            parts[0]
        };
        (host, parts[1])
    };

    let port: i64 = port
        .parse()
        .map_err(|_| Error::Configuration(format!("Invalid port in cli_url: {url}")))?;
    if !(1..=65535).contains(&port) {
        return Err(Error::Configuration(format!(
            "Invalid port in cli_url: {url}. Port must be between 1 and 65535"
        )));
    }
    Ok((host.to_string(), port as u16))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
