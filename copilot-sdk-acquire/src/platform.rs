//! Platform-specific release asset naming.

use semver::Version;

use crate::error::AcquireError;

/// Default location of published Copilot CLI releases.
pub const DEFAULT_RELEASE_BASE_URL: &str = "https://github.com/github/copilot-cli/releases/download";

/// Archive format of a release asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

/// Release naming for one OS/architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Release platform name (`linux`, `darwin`, `win32`).
    pub name: &'static str,
    /// Release architecture name (`x64`, `arm64`).
    pub arch: &'static str,
}

impl Platform {
    /// The platform this process runs on.
    pub fn current() -> Result<Self, AcquireError> {
        Self::from_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust target names onto release names.
    pub fn from_target(os: &str, arch: &str) -> Result<Self, AcquireError> {
        let name = match os {
            "linux" => "linux",
            "macos" => "darwin",
            "windows" => "win32",
            _ => {
                return Err(AcquireError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                });
            }
        };
        let arch_name = match arch {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            _ => {
                return Err(AcquireError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                });
            }
        };
        Ok(Self {
            name,
            arch: arch_name,
        })
    }

    pub fn is_windows(&self) -> bool {
        self.name == "win32"
    }

    pub fn archive_kind(&self) -> ArchiveKind {
        if self.is_windows() {
            ArchiveKind::Zip
        } else {
            ArchiveKind::TarGz
        }
    }

    /// File name of the runtime executable inside the archive.
    pub fn executable_name(&self) -> &'static str {
        if self.is_windows() {
            "copilot.exe"
        } else {
            "copilot"
        }
    }

    /// Asset file name, e.g. `copilot-linux-x64.tar.gz`.
    pub fn asset_name(&self) -> String {
        format!(
            "copilot-{}-{}.{}",
            self.name,
            self.arch,
            self.archive_kind().extension()
        )
    }

    /// Versioned download URL of this platform's asset.
    pub fn download_url(&self, base_url: &str, version: &Version) -> String {
        format!(
            "{}/v{}/{}",
            base_url.trim_end_matches('/'),
            version,
            self.asset_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform_is_supported() {
        let platform = Platform::current();
        assert!(
            platform.is_ok(),
            "current platform should map to a release name"
        );
    }

    #[test]
    fn test_linux_asset() {
        let p = Platform::from_target("linux", "x86_64").unwrap();
        assert_eq!(p.asset_name(), "copilot-linux-x64.tar.gz");
        assert_eq!(p.executable_name(), "copilot");
    }

    #[test]
    fn test_macos_arm_asset() {
        let p = Platform::from_target("macos", "aarch64").unwrap();
        assert_eq!(p.asset_name(), "copilot-darwin-arm64.tar.gz");
    }

    #[test]
    fn test_windows_uses_zip_and_exe() {
        let p = Platform::from_target("windows", "x86_64").unwrap();
        assert_eq!(p.archive_kind(), ArchiveKind::Zip);
        assert_eq!(p.asset_name(), "copilot-win32-x64.zip");
        assert_eq!(p.executable_name(), "copilot.exe");
    }

    #[test]
    fn test_unsupported_platform() {
        let err = Platform::from_target("freebsd", "x86_64").unwrap_err();
        assert!(err.to_string().contains("freebsd"));
        assert!(Platform::from_target("linux", "riscv64").is_err());
    }

    #[test]
    fn test_download_url_template() {
        let p = Platform::from_target("linux", "aarch64").unwrap();
        let url = p.download_url(
            "https://github.com/github/copilot-cli/releases/download/",
            &Version::new(0, 0, 363),
        );
        assert_eq!(
            url,
            "https://github.com/github/copilot-cli/releases/download/v0.0.363/copilot-linux-arm64.tar.gz"
        );
    }
}
