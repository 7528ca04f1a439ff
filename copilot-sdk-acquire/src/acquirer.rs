//! Runtime acquisition: reuse a compatible installed version or download one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;

use crate::archive;
use crate::checksum;
use crate::error::AcquireError;
use crate::http::{self, HttpFetcher, ReleaseFetcher};
use crate::install::{self, InstalledVersion};
use crate::platform::{DEFAULT_RELEASE_BASE_URL, Platform};

/// Runtime version this SDK release was built and tested against.
pub const PREFERRED_CLI_VERSION: &str = "0.0.363";

/// Progress of an archive download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// `None` when the server did not send a length.
    pub total_bytes: Option<u64>,
}

/// Callback receiving [`DownloadProgress`]. Invoked from a blocking worker thread.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Decides whether an installed runtime speaks a compatible protocol.
#[async_trait]
pub trait CompatibilityProbe: Send + Sync {
    async fn probe(&self, executable: &Path) -> bool;
}

/// Options for [`Acquirer`].
#[derive(Clone)]
pub struct AcquireOptions {
    /// Directory holding `copilot-<version>` subdirectories.
    pub download_dir: PathBuf,
    /// Lowest acceptable version, as a semver string.
    pub min_version: Option<String>,
    pub progress: Option<ProgressCallback>,
    /// Overrides [`DEFAULT_RELEASE_BASE_URL`]. Its host joins the allowlist.
    pub release_base_url: Option<String>,
    /// Overrides [`PREFERRED_CLI_VERSION`].
    pub preferred_version: Option<String>,
    /// Leave other version directories in place after acquiring.
    pub skip_cleanup: bool,
}

impl AcquireOptions {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            min_version: None,
            progress: None,
            release_base_url: None,
            preferred_version: None,
            skip_cleanup: false,
        }
    }

    pub fn min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    pub fn progress(mut self, callback: impl Fn(DownloadProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn release_base_url(mut self, url: impl Into<String>) -> Self {
        self.release_base_url = Some(url.into());
        self
    }

    pub fn preferred_version(mut self, version: impl Into<String>) -> Self {
        self.preferred_version = Some(version.into());
        self
    }

    pub fn skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }
}

impl std::fmt::Debug for AcquireOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquireOptions")
            .field("download_dir", &self.download_dir)
            .field("min_version", &self.min_version)
            .field("progress", &self.progress.is_some())
            .field("release_base_url", &self.release_base_url)
            .field("preferred_version", &self.preferred_version)
            .field("skip_cleanup", &self.skip_cleanup)
            .finish()
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRecord {
    /// Version directory name, e.g. `copilot-0.0.363`.
    pub dir_name: String,
    pub version: Version,
    /// Verified path of the runtime executable.
    pub executable: PathBuf,
    /// Whether this call downloaded the runtime.
    pub downloaded: bool,
}

impl From<(InstalledVersion, bool)> for AcquisitionRecord {
    fn from((installed, downloaded): (InstalledVersion, bool)) -> Self {
        Self {
            dir_name: installed.dir_name,
            version: installed.version,
            executable: installed.executable,
            downloaded,
        }
    }
}

/// Chooses, downloads and installs a runtime into a managed directory.
pub struct Acquirer {
    options: AcquireOptions,
    fetcher: Arc<dyn ReleaseFetcher>,
    probe: Option<Arc<dyn CompatibilityProbe>>,
    platform: Option<Platform>,
    reserved_dir: Option<PathBuf>,
}

impl Acquirer {
    pub fn new(options: AcquireOptions) -> Self {
        let extra_hosts = options
            .release_base_url
            .as_deref()
            .and_then(http::host_of)
            .into_iter()
            .collect();
        Self {
            options,
            fetcher: Arc::new(HttpFetcher::new(extra_hosts)),
            probe: None,
            platform: None,
            reserved_dir: install::reserved_install_dir(),
        }
    }

    /// Replace the HTTP fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ReleaseFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Probe non-preferred installed versions before reusing them.
    ///
    /// Without a probe, any installed version at or above the minimum is reused.
    pub fn with_probe(mut self, probe: Arc<dyn CompatibilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Acquire for a platform other than the host's.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Override the reserved directory (tests).
    pub fn with_reserved_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reserved_dir = Some(dir.into());
        self
    }

    pub fn options(&self) -> &AcquireOptions {
        &self.options
    }

    /// Return a compatible runtime, downloading one if none is installed.
    ///
    /// Afterwards the download directory holds exactly the chosen version,
    /// unless [`AcquireOptions::skip_cleanup`] is set.
    pub async fn acquire(&self) -> Result<AcquisitionRecord, AcquireError> {
        let download_dir = self.options.download_dir.clone();
        if let Some(reserved) = &self.reserved_dir
            && install::is_reserved_dir(&download_dir, reserved)
        {
            return Err(AcquireError::Configuration(format!(
                "{} is reserved for the Copilot CLI's own installs; choose another download_dir",
                download_dir.display()
            )));
        }

        let min_version = parse_version("min_version", self.options.min_version.as_deref())?;
        let preferred = parse_version(
            "preferred_version",
            Some(
                self.options
                    .preferred_version
                    .as_deref()
                    .unwrap_or(PREFERRED_CLI_VERSION),
            ),
        )?
        .ok_or_else(|| AcquireError::Configuration("preferred_version is empty".to_string()))?;

        let platform = match self.platform {
            Some(platform) => platform,
            None => Platform::current()?,
        };
        let exe_name = platform.executable_name();

        let installed = {
            let dir = download_dir.clone();
            tokio::task::spawn_blocking(move || install::installed_versions(&dir, exe_name))
                .await
                .map_err(|e| AcquireError::Task(e.to_string()))?
        };

        let mut chosen = None;
        for candidate in installed {
            if min_version.as_ref().is_some_and(|min| candidate.version < *min) {
                log::debug!("Skipping Copilot CLI {}: below minimum", candidate.version);
                continue;
            }
            if candidate.version == preferred {
                chosen = Some(candidate);
                break;
            }
            let compatible = match &self.probe {
                Some(probe) => probe.probe(&candidate.executable).await,
                None => true,
            };
            if compatible {
                chosen = Some(candidate);
                break;
            }
            log::info!(
                "Installed Copilot CLI {} failed the compatibility probe",
                candidate.version
            );
        }

        let record = match chosen {
            Some(installed) => {
                log::info!(
                    "Using installed Copilot CLI {} at {}",
                    installed.version,
                    installed.executable.display()
                );
                AcquisitionRecord::from((installed, false))
            }
            None => {
                let target = match min_version {
                    Some(min) if min > preferred => min,
                    _ => preferred,
                };
                let installed = self.download(platform, target).await?;
                AcquisitionRecord::from((installed, true))
            }
        };

        if self.options.skip_cleanup {
            log::debug!("Skipping cleanup of {}", download_dir.display());
        } else {
            let keep = record.dir_name.clone();
            let dir = download_dir.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || install::cleanup_except(&dir, &keep)).await
            {
                log::warn!("Runtime directory cleanup did not complete: {}", e);
            }
        }

        Ok(record)
    }

    async fn download(
        &self,
        platform: Platform,
        version: Version,
    ) -> Result<InstalledVersion, AcquireError> {
        let base_url = self
            .options
            .release_base_url
            .as_deref()
            .unwrap_or(DEFAULT_RELEASE_BASE_URL);
        let url = platform.download_url(base_url, &version);
        let download_dir = self.options.download_dir.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let progress = self.options.progress.clone();

        log::info!("Downloading Copilot CLI {} from {}", version, url);

        tokio::task::spawn_blocking(move || {
            download_and_install(
                fetcher.as_ref(),
                platform,
                &version,
                &url,
                &download_dir,
                progress,
            )
        })
        .await
        .map_err(|e| AcquireError::Task(e.to_string()))?
    }
}

fn parse_version(field: &str, raw: Option<&str>) -> Result<Option<Version>, AcquireError> {
    match raw {
        None => Ok(None),
        Some(raw) => Version::parse(raw.trim().trim_start_matches('v'))
            .map(Some)
            .map_err(|e| AcquireError::Configuration(format!("invalid {} '{}': {}", field, raw, e))),
    }
}

fn download_and_install(
    fetcher: &dyn ReleaseFetcher,
    platform: Platform,
    version: &Version,
    url: &str,
    download_dir: &Path,
    progress: Option<ProgressCallback>,
) -> Result<InstalledVersion, AcquireError> {
    std::fs::create_dir_all(download_dir)
        .map_err(|e| AcquireError::io("failed to create download directory", download_dir, e))?;

    let staging = tempfile::Builder::new()
        .prefix(install::STAGING_PREFIX)
        .tempdir_in(download_dir)
        .map_err(|e| AcquireError::io("failed to create staging directory", download_dir, e))?;

    let archive_path = staging.path().join(platform.asset_name());
    let mut archive_file = std::fs::File::create(&archive_path)
        .map_err(|e| AcquireError::io("failed to create archive file", &archive_path, e))?;

    let download_error = |status: Option<u16>, cause: String| AcquireError::Download {
        version: version.to_string(),
        url: url.to_string(),
        status,
        cause,
    };

    let mut report = |bytes_downloaded: u64, total_bytes: Option<u64>| {
        if let Some(callback) = &progress {
            callback(DownloadProgress {
                bytes_downloaded,
                total_bytes,
            });
        }
    };
    let bytes = fetcher
        .fetch_to(url, &mut archive_file, &mut report)
        .map_err(|e| download_error(e.status, e.cause))?;
    drop(archive_file);
    log::debug!("Downloaded {} bytes to {}", bytes, archive_path.display());

    let checksum_url = format!("{}.sha256", url);
    match fetcher
        .fetch_text(&checksum_url)
        .map_err(|e| download_error(e.status, format!("checksum download failed: {}", e.cause)))?
    {
        Some(content) => {
            let expected = checksum::parse_checksum_file(&content)
                .map_err(|cause| download_error(None, cause))?;
            let actual = checksum::compute_file_hash(&archive_path)
                .map_err(|e| AcquireError::io("failed to hash archive", &archive_path, e))?;
            if actual != expected {
                return Err(AcquireError::ChecksumMismatch {
                    version: version.to_string(),
                    expected,
                    actual,
                });
            }
            log::info!("SHA256 checksum verified for Copilot CLI {}", version);
        }
        None => log::warn!(
            "No .sha256 checksum published for Copilot CLI {}; skipping integrity verification",
            version
        ),
    }

    let extract_dir = staging.path().join("extract");
    archive::extract(platform.archive_kind(), &archive_path, &extract_dir).map_err(|cause| {
        AcquireError::Extract {
            archive: archive_path.clone(),
            cause,
        }
    })?;

    let exe_name = platform.executable_name();
    let source = archive::find_executable(&extract_dir, exe_name).ok_or_else(|| {
        AcquireError::ExecutableNotFound {
            version: version.to_string(),
            name: exe_name.to_string(),
        }
    })?;

    install::install_executable(download_dir, staging.path(), version, &source, exe_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::http::FetchError;

    /// Serves an in-memory archive for every URL and records requests.
    struct FakeFetcher {
        archive: Vec<u8>,
        checksum: Option<String>,
        status: Option<u16>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn serving(archive: Vec<u8>) -> Self {
            Self {
                archive,
                checksum: None,
                status: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn archive_requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|u| !u.ends_with(".sha256"))
                .cloned()
                .collect()
        }
    }

    impl ReleaseFetcher for FakeFetcher {
        fn fetch_to(
            &self,
            url: &str,
            dest: &mut dyn Write,
            progress: &mut dyn FnMut(u64, Option<u64>),
        ) -> Result<u64, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            if let Some(status) = self.status {
                return Err(FetchError::status(status));
            }
            let total = self.archive.len() as u64;
            for (i, chunk) in self.archive.chunks(16).enumerate() {
                dest.write_all(chunk).unwrap();
                progress(((i * 16) + chunk.len()) as u64, Some(total));
            }
            Ok(total)
        }

        fn fetch_text(&self, url: &str) -> Result<Option<String>, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(self.checksum.clone())
        }
    }

    struct FakeProbe {
        accept: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompatibilityProbe for FakeProbe {
        async fn probe(&self, _executable: &Path) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    fn linux() -> Platform {
        Platform::from_target("linux", "x86_64").unwrap()
    }

    fn tar_gz_with(name: &str, data: &[u8]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn fake_install(root: &Path, version: &str) {
        let dir = root.join(format!("copilot-{version}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("copilot"), b"installed").unwrap();
    }

    fn dir_names(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn acquirer(options: AcquireOptions, fetcher: Arc<FakeFetcher>, reserved: &Path) -> Acquirer {
        Acquirer::new(options)
            .with_fetcher(fetcher)
            .with_platform(linux())
            .with_reserved_dir(reserved)
    }

    #[tokio::test]
    async fn test_reuses_compatible_installed_version_without_download() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        fake_install(&dir, "0.0.400");
        fake_install(&dir, "0.0.300");
        let fetcher = Arc::new(FakeFetcher::serving(Vec::new()));
        let probe = Arc::new(FakeProbe {
            accept: true,
            calls: AtomicUsize::new(0),
        });

        let record = acquirer(AcquireOptions::new(&dir), fetcher.clone(), &tmp.path().join("r"))
            .with_probe(probe.clone())
            .acquire()
            .await
            .unwrap();

        assert_eq!(record.version, Version::new(0, 0, 400));
        assert!(!record.downloaded);
        assert!(fetcher.archive_requests().is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir_names(&dir), vec!["copilot-0.0.400"]);
    }

    #[tokio::test]
    async fn test_skip_cleanup_keeps_other_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        fake_install(&dir, "0.0.400");
        fake_install(&dir, "0.0.300");

        let record = acquirer(
            AcquireOptions::new(&dir).skip_cleanup(true),
            Arc::new(FakeFetcher::serving(Vec::new())),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap();

        assert_eq!(record.version, Version::new(0, 0, 400));
        assert_eq!(dir_names(&dir), vec!["copilot-0.0.300", "copilot-0.0.400"]);
    }

    #[tokio::test]
    async fn test_preferred_version_skips_probe() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        fake_install(&dir, PREFERRED_CLI_VERSION);
        let probe = Arc::new(FakeProbe {
            accept: false,
            calls: AtomicUsize::new(0),
        });

        let record = acquirer(
            AcquireOptions::new(&dir),
            Arc::new(FakeFetcher::serving(Vec::new())),
            &tmp.path().join("r"),
        )
        .with_probe(probe.clone())
        .acquire()
        .await
        .unwrap();

        assert_eq!(record.version.to_string(), PREFERRED_CLI_VERSION);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_downloads_when_nothing_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        let archive = tar_gz_with("package/copilot", b"#!/bin/sh\necho hi\n");
        let fetcher = Arc::new(FakeFetcher::serving(archive.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let options = AcquireOptions::new(&dir)
            .min_version("1.2.0")
            .progress(move |p| seen_cb.lock().unwrap().push(p));
        let record = acquirer(options, fetcher.clone(), &tmp.path().join("r"))
            .acquire()
            .await
            .unwrap();

        assert!(record.downloaded);
        assert_eq!(record.version, Version::new(1, 2, 0));
        assert_eq!(record.dir_name, "copilot-1.2.0");
        assert_eq!(
            std::fs::read(&record.executable).unwrap(),
            b"#!/bin/sh\necho hi\n"
        );
        assert_eq!(
            fetcher.archive_requests(),
            vec![
                "https://github.com/github/copilot-cli/releases/download/v1.2.0/copilot-linux-x64.tar.gz"
                    .to_string()
            ]
        );
        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last.bytes_downloaded, archive.len() as u64);
        assert_eq!(last.total_bytes, Some(archive.len() as u64));
        assert_eq!(dir_names(&dir), vec!["copilot-1.2.0"]);
    }

    #[tokio::test]
    async fn test_incompatible_installs_replaced_by_download() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        fake_install(&dir, "0.0.1");
        fake_install(&dir, "0.0.2");
        let fetcher = Arc::new(FakeFetcher::serving(tar_gz_with("copilot", b"fresh")));
        let probe = Arc::new(FakeProbe {
            accept: false,
            calls: AtomicUsize::new(0),
        });

        let record = acquirer(AcquireOptions::new(&dir), fetcher.clone(), &tmp.path().join("r"))
            .with_probe(probe.clone())
            .acquire()
            .await
            .unwrap();

        assert!(record.downloaded);
        assert_eq!(record.version.to_string(), PREFERRED_CLI_VERSION);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dir_names(&dir), vec![format!("copilot-{PREFERRED_CLI_VERSION}")]);
    }

    #[tokio::test]
    async fn test_versions_below_minimum_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runtimes");
        fake_install(&dir, "0.5.0");
        let fetcher = Arc::new(FakeFetcher::serving(tar_gz_with("copilot", b"x")));

        let record = acquirer(
            AcquireOptions::new(&dir).min_version("1.0.0"),
            fetcher.clone(),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap();

        assert_eq!(record.version, Version::new(1, 0, 0));
        assert_eq!(fetcher.archive_requests().len(), 1);
        assert!(!dir.join("copilot-0.5.0").exists());
    }

    #[tokio::test]
    async fn test_reserved_dir_rejected_before_io() {
        let tmp = tempfile::tempdir().unwrap();
        let reserved = tmp.path().join(".copilot").join("pkg");
        let fetcher = Arc::new(FakeFetcher::serving(Vec::new()));

        let err = acquirer(AcquireOptions::new(&reserved), fetcher.clone(), &reserved)
            .acquire()
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::Configuration(_)));
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert!(!reserved.exists());
    }

    #[tokio::test]
    async fn test_malformed_min_version_rejected_before_io() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::serving(Vec::new()));

        let err = acquirer(
            AcquireOptions::new(tmp.path().join("d")).min_version("not-a-version"),
            fetcher.clone(),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap_err();

        assert!(matches!(err, AcquireError::Configuration(ref m) if m.contains("min_version")));
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_carries_version_and_status() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fake = FakeFetcher::serving(Vec::new());
        fake.status = Some(404);

        let err = acquirer(
            AcquireOptions::new(tmp.path().join("d")).min_version("9.9.9"),
            Arc::new(fake),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap_err();

        match err {
            AcquireError::Download {
                version, status, ..
            } => {
                assert_eq!(version, "9.9.9");
                assert_eq!(status, Some(404));
            }
            other => panic!("expected download error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_archive_without_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        let fetcher = Arc::new(FakeFetcher::serving(tar_gz_with("README.md", b"docs")));

        let err = acquirer(AcquireOptions::new(&dir), fetcher, &tmp.path().join("r"))
            .acquire()
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::ExecutableNotFound { ref name, .. } if name == "copilot"));
        assert!(dir_names(&dir).is_empty(), "staging must be cleaned up");
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fake = FakeFetcher::serving(tar_gz_with("copilot", b"x"));
        fake.checksum = Some(format!("{}  copilot-linux-x64.tar.gz\n", "0".repeat(64)));

        let err = acquirer(
            AcquireOptions::new(tmp.path().join("d")),
            Arc::new(fake),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap_err();

        assert!(matches!(err, AcquireError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_checksum_match_installs() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tar_gz_with("copilot", b"x");
        let mut fake = FakeFetcher::serving(archive.clone());
        fake.checksum = Some(checksum::compute_data_hash(&archive));

        let record = acquirer(
            AcquireOptions::new(tmp.path().join("d")),
            Arc::new(fake),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap();

        assert!(record.executable.is_file());
    }

    #[tokio::test]
    async fn test_custom_base_url_used() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::serving(tar_gz_with("copilot", b"x")));

        acquirer(
            AcquireOptions::new(tmp.path().join("d"))
                .release_base_url("https://mirror.example.com/cli/")
                .preferred_version("2.0.0"),
            fetcher.clone(),
            &tmp.path().join("r"),
        )
        .acquire()
        .await
        .unwrap();

        assert_eq!(
            fetcher.archive_requests(),
            vec!["https://mirror.example.com/cli/v2.0.0/copilot-linux-x64.tar.gz".to_string()]
        );
    }
}
