//! Runtime process supervision: spawn, port announcement, exit tracking.
//!
//! The child is owned by a monitor task for its whole life. The
//! [`RuntimeProcess`] handle observes its state and asks it to kill the
//! child; dropping the handle kills the child too.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use crate::error::ProcessLaunchError;
use crate::options::{ClientOptions, Endpoint};

/// Default executable name looked up on `PATH`.
pub const DEFAULT_CLI_NAME: &str = "copilot";

/// Environment variable the runtime reads the auth token from.
pub const AUTH_TOKEN_ENV: &str = "COPILOT_SDK_AUTH_TOKEN";

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_LIMIT: usize = 64 * 1024;

/// Lifecycle of the runtime process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Launching,
    AwaitingHandshake,
    Ready,
    /// Exit code, if the process exited normally.
    Exited(Option<i32>),
}

/// Boxed halves of the byte stream to the runtime.
pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolve the executable to launch.
///
/// A bare name is searched on `path_var`; when it cannot be found the name
/// is used as given and spawning reports the failure.
pub fn resolve_cli_path(cli_path: Option<&Path>, path_var: Option<&str>) -> PathBuf {
    let requested = cli_path.unwrap_or_else(|| Path::new(DEFAULT_CLI_NAME));
    if requested.components().count() != 1 {
        return requested.to_path_buf();
    }
    let Some(path_var) = path_var else {
        return requested.to_path_buf();
    };
    let names: Vec<PathBuf> = if cfg!(windows) && requested.extension().is_none() {
        ["exe", "cmd", "bat"]
            .iter()
            .map(|ext| requested.with_extension(ext))
            .collect()
    } else {
        vec![requested.to_path_buf()]
    };
    for dir in std::env::split_paths(path_var) {
        for name in &names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    requested.to_path_buf()
}

/// Arguments passed to the runtime after any user-supplied ones.
pub fn runtime_args(options: &ClientOptions) -> Vec<String> {
    let mut args = options.cli_args.clone();
    args.extend([
        "--headless".to_string(),
        "--no-auto-update".to_string(),
        "--log-level".to_string(),
        options.log_level.as_str().to_string(),
    ]);
    if options.uses_stdio() {
        args.push("--stdio".to_string());
    } else if options.port != 0 {
        args.extend(["--port".to_string(), options.port.to_string()]);
    }
    if options.github_token.is_some() {
        args.extend(["--auth-token-env".to_string(), AUTH_TOKEN_ENV.to_string()]);
    }
    if !options.effective_use_logged_in_user() {
        args.push("--no-auto-login".to_string());
    }
    args
}

/// Extract the port from a `listening on port <n>` announcement.
pub(crate) fn parse_port_announcement(line: &str) -> Option<u16> {
    let re = Regex::new(r"(?i)listening on port (\d+)").ok()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

// ---------------------------------------------------------------------------
// Process handle
// ---------------------------------------------------------------------------

/// A spawned runtime process.
pub(crate) struct RuntimeProcess {
    program: PathBuf,
    pid: Option<u32>,
    state: Arc<Mutex<ProcessState>>,
    stderr_tail: Arc<Mutex<String>>,
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    kill_tx: Option<oneshot::Sender<()>>,
    /// TCP mode keeps stdin open for the life of the process.
    _stdin: Option<ChildStdin>,
}

impl RuntimeProcess {
    /// Spawn the runtime and return the handle plus the transport halves.
    ///
    /// In TCP mode this waits, bounded by `startup_timeout`, for the port
    /// announcement and connects to it.
    pub(crate) async fn launch(
        program: &Path,
        options: &ClientOptions,
    ) -> Result<(Self, BoxedReader, BoxedWriter), ProcessLaunchError> {
        let state = Arc::new(Mutex::new(ProcessState::Launching));
        let args = runtime_args(options);
        let (exe, full_args) = command_line(program, args);
        log::info!("Spawning Copilot CLI: {} {}", exe.display(), full_args.join(" "));

        let mut command = Command::new(&exe);
        command
            .args(&full_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_remove("NODE_DEBUG")
            .envs(&options.env)
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        if let Some(token) = &options.github_token {
            command.env(AUTH_TOKEN_ENV, token);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProcessLaunchError::NotFound {
                    path: program.to_path_buf(),
                }
            } else {
                ProcessLaunchError::Spawn {
                    path: program.to_path_buf(),
                    source,
                }
            }
        })?;
        let pid = child.id();
        log::info!("Copilot CLI started (pid {pid:?})");

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_reader(stderr, Arc::clone(&stderr_tail));
        }
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        *state.lock() = ProcessState::AwaitingHandshake;
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        spawn_monitor(child, Arc::clone(&state), exit_tx, kill_rx);

        let mut process = Self {
            program: program.to_path_buf(),
            pid,
            state,
            stderr_tail,
            exit_rx,
            kill_tx: Some(kill_tx),
            _stdin: None,
        };

        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            process.kill().await;
            return Err(ProcessLaunchError::Spawn {
                path: program.to_path_buf(),
                source: std::io::Error::other("stdio pipes were not captured"),
            });
        };

        let endpoint = options.endpoint().map_err(|e| {
            ProcessLaunchError::PortAnnouncement(format!("invalid endpoint: {e}"))
        })?;
        if endpoint == Endpoint::Stdio {
            return Ok((process, Box::new(stdout), Box::new(stdin)));
        }

        let announced = tokio::select! {
            port = wait_for_port(stdout) => port,
            code = process.exited() => {
                return Err(ProcessLaunchError::ExitedImmediately {
                    code,
                    stderr: process.stderr_snapshot(),
                });
            }
            _ = tokio::time::sleep(options.startup_timeout) => {
                process.kill().await;
                return Err(ProcessLaunchError::HandshakeTimeout {
                    after: options.startup_timeout,
                    stderr: process.stderr_snapshot(),
                });
            }
        };
        let port = match announced {
            Ok(port) => port,
            Err(e) => {
                process.kill().await;
                return Err(e);
            }
        };
        process._stdin = Some(stdin);

        log::info!("Copilot CLI listening on port {port}");
        let stream = match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => stream,
            Err(e) => {
                process.kill().await;
                return Err(ProcessLaunchError::PortAnnouncement(format!(
                    "failed to connect to 127.0.0.1:{port}: {e}"
                )));
            }
        };
        let (reader, writer) = stream.into_split();
        Ok((process, Box::new(reader), Box::new(writer)))
    }

    pub(crate) fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn state(&self) -> ProcessState {
        self.state.lock().clone()
    }

    pub(crate) fn mark_ready(&self) {
        let mut state = self.state.lock();
        if *state == ProcessState::AwaitingHandshake {
            *state = ProcessState::Ready;
        }
    }

    /// The last 64 KiB the process wrote to stderr.
    pub(crate) fn stderr_snapshot(&self) -> String {
        self.stderr_tail.lock().trim().to_string()
    }

    /// Wait for the process to exit and return its exit code.
    pub(crate) async fn exited(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.flatten(),
            Err(_) => None,
        }
    }

    /// A receiver that yields the exit code once the process has exited.
    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<Option<i32>>> {
        self.exit_rx.clone()
    }

    /// Kill the process and wait for it to be reaped.
    pub(crate) async fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.exited()).await;
    }

    /// Wait up to `grace` for a voluntary exit, then kill.
    pub(crate) async fn shutdown(&mut self, grace: Duration) {
        if tokio::time::timeout(grace, self.exited()).await.is_err() {
            log::debug!("Copilot CLI did not exit within {grace:?}; killing");
        }
        self.kill().await;
    }
}

impl Drop for RuntimeProcess {
    fn drop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// `.js` entry points run under node.
fn command_line(program: &Path, args: Vec<String>) -> (PathBuf, Vec<String>) {
    if program.extension().is_some_and(|ext| ext == "js") {
        let mut full = vec![program.to_string_lossy().into_owned()];
        full.extend(args);
        (PathBuf::from("node"), full)
    } else {
        (program.to_path_buf(), args)
    }
}

fn spawn_monitor(
    mut child: Child,
    state: Arc<Mutex<ProcessState>>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    kill_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    log::debug!("Copilot CLI kill: {e}");
                }
                child.wait().await
            }
        };
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                log::warn!("Failed to wait for Copilot CLI: {e}");
                None
            }
        };
        log::info!("Copilot CLI exited with code {code:?}");
        *state.lock() = ProcessState::Exited(code);
        let _ = exit_tx.send(Some(code));
    });
}

fn spawn_stderr_reader(
    stderr: tokio::process::ChildStderr,
    tail: Arc<Mutex<String>>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        log::warn!("Copilot CLI stderr: {trimmed}");
                    }
                    append_tail(&mut tail.lock(), &line);
                }
                Err(_) => break,
            }
        }
    });
}

fn append_tail(tail: &mut String, chunk: &str) {
    tail.push_str(chunk);
    if tail.len() > STDERR_TAIL_LIMIT {
        let mut cut = tail.len() - STDERR_TAIL_LIMIT;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

/// Read stdout until the port announcement, then keep draining it.
async fn wait_for_port(stdout: ChildStdout) -> Result<u16, ProcessLaunchError> {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(port) = parse_port_announcement(&line) {
                    tokio::spawn(async move {
                        while let Ok(Some(line)) = lines.next_line().await {
                            log::debug!("Copilot CLI stdout: {line}");
                        }
                    });
                    return Ok(port);
                }
                log::debug!("Copilot CLI stdout: {line}");
            }
            Ok(None) => {
                return Err(ProcessLaunchError::PortAnnouncement(
                    "stdout closed before the server announced its port".to_string(),
                ));
            }
            Err(e) => {
                return Err(ProcessLaunchError::PortAnnouncement(format!(
                    "failed to read stdout: {e}"
                )));
            }
        }
    }
}
