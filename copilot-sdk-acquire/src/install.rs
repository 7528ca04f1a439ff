//! On-disk layout of installed runtimes: `<download_dir>/copilot-<version>/copilot[.exe]`.

use std::path::{Component, Path, PathBuf};

use semver::Version;

use crate::error::AcquireError;

/// Prefix of every version directory.
pub const VERSION_DIR_PREFIX: &str = "copilot-";

/// Prefix of scratch directories created while downloading.
pub const STAGING_PREFIX: &str = ".copilot-staging-";

/// The runtime's own global install location. The SDK must never manage it.
pub fn reserved_install_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".copilot").join("pkg"))
}

/// Lexically normalize a path, then resolve symlinks when it exists.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    std::fs::canonicalize(&out).unwrap_or(out)
}

/// Whether `dir` names the reserved install location.
pub fn is_reserved_dir(dir: &Path, reserved: &Path) -> bool {
    normalize(dir) == normalize(reserved)
}

pub fn version_dir_name(version: &Version) -> String {
    format!("{}{}", VERSION_DIR_PREFIX, version)
}

/// Parse `copilot-<semver>`; anything else is ignored.
pub fn parse_version_dir(name: &str) -> Option<Version> {
    name.strip_prefix(VERSION_DIR_PREFIX)
        .and_then(|rest| Version::parse(rest).ok())
}

/// A usable runtime found in the download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub dir_name: String,
    pub version: Version,
    pub dir: PathBuf,
    pub executable: PathBuf,
}

/// List installed versions whose executable exists, newest first.
///
/// A missing download directory yields an empty list.
pub fn installed_versions(download_dir: &Path, executable_name: &str) -> Vec<InstalledVersion> {
    let entries = match std::fs::read_dir(download_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!(
                "No installed runtimes in {}: {}",
                download_dir.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut found: Vec<InstalledVersion> = entries
        .flatten()
        .filter_map(|entry| {
            let dir_name = entry.file_name().to_str()?.to_string();
            let version = parse_version_dir(&dir_name)?;
            let dir = entry.path();
            let executable = dir.join(executable_name);
            executable.is_file().then_some(InstalledVersion {
                dir_name,
                version,
                dir,
                executable,
            })
        })
        .collect();

    found.sort_by(|a, b| b.version.cmp(&a.version));
    found
}

/// Copy `source` into a fresh version directory and move it into place.
///
/// The directory is assembled under `staging` (which must live on the same
/// filesystem as `download_dir`) and renamed over any existing directory of
/// the same version.
pub fn install_executable(
    download_dir: &Path,
    staging: &Path,
    version: &Version,
    source: &Path,
    executable_name: &str,
) -> Result<InstalledVersion, AcquireError> {
    let dir_name = version_dir_name(version);
    let staged_dir = staging.join(&dir_name);
    std::fs::create_dir_all(&staged_dir)
        .map_err(|e| AcquireError::io("failed to create version directory", &staged_dir, e))?;

    let staged_exe = staged_dir.join(executable_name);
    std::fs::copy(source, &staged_exe)
        .map_err(|e| AcquireError::io("failed to copy executable", &staged_exe, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&staged_exe, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| AcquireError::io("failed to set permissions", &staged_exe, e))?;
    }

    let final_dir = download_dir.join(&dir_name);
    if final_dir.exists() {
        std::fs::remove_dir_all(&final_dir)
            .map_err(|e| AcquireError::io("failed to replace version directory", &final_dir, e))?;
    }
    std::fs::rename(&staged_dir, &final_dir)
        .map_err(|e| AcquireError::io("failed to move version directory into place", &final_dir, e))?;

    log::info!("Installed Copilot CLI {} at {}", version, final_dir.display());

    Ok(InstalledVersion {
        executable: final_dir.join(executable_name),
        dir_name,
        version: version.clone(),
        dir: final_dir,
    })
}

/// Remove every version and staging directory except `keep`. Best-effort.
pub fn cleanup_except(download_dir: &Path, keep: &str) {
    let Ok(entries) = std::fs::read_dir(download_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let managed = name.starts_with(VERSION_DIR_PREFIX) || name.starts_with(STAGING_PREFIX);
        if !managed || name == keep {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => log::debug!("Removed old runtime directory {}", path.display()),
            Err(e) => log::warn!(
                "Failed to remove old runtime directory {}: {}",
                path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_install(root: &Path, version: &str, exe: &str) -> PathBuf {
        let dir = root.join(format!("copilot-{version}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(exe), b"bin").unwrap();
        dir
    }

    #[test]
    fn test_parse_version_dir() {
        assert_eq!(parse_version_dir("copilot-1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version_dir("copilot-latest"), None);
        assert_eq!(parse_version_dir("other-1.2.3"), None);
    }

    #[test]
    fn test_installed_versions_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        fake_install(tmp.path(), "0.0.9", "copilot");
        fake_install(tmp.path(), "0.0.10", "copilot");
        // Directory without an executable is not usable.
        std::fs::create_dir(tmp.path().join("copilot-0.0.11")).unwrap();
        std::fs::create_dir(tmp.path().join("copilot-garbage")).unwrap();

        let found = installed_versions(tmp.path(), "copilot");
        let versions: Vec<String> = found.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(versions, vec!["0.0.10", "0.0.9"]);
    }

    #[test]
    fn test_installed_versions_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(installed_versions(&tmp.path().join("nope"), "copilot").is_empty());
    }

    #[test]
    fn test_is_reserved_dir_normalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let reserved = tmp.path().join(".copilot").join("pkg");
        let sneaky = tmp.path().join(".copilot").join("x").join("..").join("pkg").join(".");
        assert!(is_reserved_dir(&sneaky, &reserved));
        assert!(!is_reserved_dir(&tmp.path().join("mine"), &reserved));
    }

    #[test]
    fn test_install_replaces_existing_version() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = fake_install(tmp.path(), "1.0.0", "copilot");
        std::fs::write(existing.join("stale.txt"), b"old").unwrap();

        let source = tmp.path().join("new-copilot");
        std::fs::write(&source, b"new").unwrap();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(tmp.path())
            .unwrap();

        let installed = install_executable(
            tmp.path(),
            staging.path(),
            &Version::new(1, 0, 0),
            &source,
            "copilot",
        )
        .unwrap();

        assert_eq!(std::fs::read(&installed.executable).unwrap(), b"new");
        assert!(!existing.join("stale.txt").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&installed.executable)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_cleanup_keeps_only_selected() {
        let tmp = tempfile::tempdir().unwrap();
        fake_install(tmp.path(), "1.0.0", "copilot");
        fake_install(tmp.path(), "2.0.0", "copilot");
        std::fs::create_dir(tmp.path().join(".copilot-staging-abc")).unwrap();
        std::fs::create_dir(tmp.path().join("unrelated")).unwrap();

        cleanup_except(tmp.path(), "copilot-2.0.0");

        let mut names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["copilot-2.0.0", "unrelated"]);
    }
}
