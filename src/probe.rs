//! Protocol compatibility probe for installed runtimes.

use std::path::Path;

use async_trait::async_trait;
use copilot_sdk_acquire::CompatibilityProbe;

use crate::client::Client;
use crate::options::ClientOptions;

/// Starts a throwaway client against a candidate executable and reports
/// whether the ping handshake succeeds with a matching protocol version.
#[derive(Debug, Clone)]
pub struct RuntimeProbe {
    base: ClientOptions,
}

impl RuntimeProbe {
    /// Probe with the launch settings of `base` (args, env, cwd, timeouts).
    pub fn new(base: &ClientOptions) -> Self {
        let mut base = base.clone();
        base.cli_url = None;
        base.use_stdio = Some(true);
        base.acquisition = None;
        base.auto_start = true;
        base.auto_restart = false;
        Self { base }
    }

    fn options_for(&self, executable: &Path) -> ClientOptions {
        let mut options = self.base.clone();
        options.cli_path = Some(executable.to_path_buf());
        options
    }
}

#[async_trait]
impl CompatibilityProbe for RuntimeProbe {
    async fn probe(&self, executable: &Path) -> bool {
        let client = match Client::new(self.options_for(executable)) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("Cannot probe {}: {e}", executable.display());
                return false;
            }
        };
        let result = client.start().await;
        client.force_stop().await;
        match result {
            Ok(()) => true,
            Err(e) => {
                log::info!("{} failed the compatibility probe: {e}", executable.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_options_are_self_contained() {
        let base = ClientOptions {
            cli_args: vec!["--allow-all".to_string()],
            auto_restart: true,
            ..Default::default()
        };
        let probe = RuntimeProbe::new(&base);
        let options = probe.options_for(Path::new("/opt/copilot-1.0.0/copilot"));
        assert_eq!(options.cli_path.as_deref(), Some(Path::new("/opt/copilot-1.0.0/copilot")));
        assert_eq!(options.cli_args, ["--allow-all"]);
        assert!(options.acquisition.is_none());
        assert!(!options.auto_restart);
        assert!(options.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_probe() {
        let dir = tempfile::tempdir().unwrap();
        let probe = RuntimeProbe::new(&ClientOptions::default());
        assert!(!probe.probe(&dir.path().join("copilot")).await);
    }
}
