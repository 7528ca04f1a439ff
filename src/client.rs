//! Client lifecycle: acquire, spawn or connect, handshake, supervise.
//!
//! A [`Client`] owns at most one runtime process and one transport, shared by
//! every session it creates. It is cheap to clone.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use copilot_sdk_acquire::Acquirer;
use copilot_sdk_rpc::RpcClient;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::error::{Error, ProcessLaunchError, Result};
use crate::options::{ClientOptions, Endpoint};
use crate::probe::RuntimeProbe;
use crate::process::{self, ProcessState, RuntimeProcess};
use crate::protocol::{
    AuthStatus, DeleteSessionResult, LastSessionIdResult, ListModelsResult, ListSessionsResult,
    ModelInfo, PingResponse, SDK_PROTOCOL_VERSION, SessionCreated, SessionMetadata,
    StatusResponse,
};
use crate::router;
use crate::session::{Session, SessionInner, SessionRegistry};
use crate::session_config::SessionConfig;

/// How long a stopping runtime may take to exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for an exit code after the transport drops during the handshake.
const EXIT_CODE_GRACE: Duration = Duration::from_secs(1);

/// Connection status of a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Starting,
    Connected,
    Stopping,
    /// The last start attempt failed or the connection was lost.
    Error(String),
}

/// One live transport plus everything bound to it.
struct Connection {
    rpc: Arc<RpcClient>,
    process: Option<RuntimeProcess>,
    sessions: SessionRegistry,
    stopping: Arc<AtomicBool>,
    router: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.rpc.is_closed()
    }
}

struct ClientInner {
    options: ClientOptions,
    state: Mutex<ConnectionState>,
    /// Serializes start and stop; held for the whole transition.
    connection: tokio::sync::Mutex<Option<Connection>>,
    models: tokio::sync::Mutex<Option<Vec<ModelInfo>>>,
    /// Connected through `from_stream`; cannot be restarted.
    stream_backed: AtomicBool,
}

/// Handle to the Copilot CLI runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Client {
    /// Create a client. Nothing is spawned until [`Client::start`] or the
    /// first operation (with `auto_start`).
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                options,
                state: Mutex::new(ConnectionState::Disconnected),
                connection: tokio::sync::Mutex::new(None),
                models: tokio::sync::Mutex::new(None),
                stream_backed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect over an existing byte stream and perform the handshake.
    ///
    /// No process is owned; the client cannot restart once the stream closes.
    pub async fn from_stream<R, W>(options: ClientOptions, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client = Self::new(options)?;
        client.inner.stream_backed.store(true, Ordering::SeqCst);
        let mut slot = client.inner.connection.lock().await;
        client.set_state(ConnectionState::Starting);
        match client.establish(None, Box::new(reader), Box::new(writer)).await {
            Ok(connection) => {
                *slot = Some(connection);
                client.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                client.set_state(ConnectionState::Error(e.to_string()));
                return Err(e);
            }
        }
        drop(slot);
        Ok(client)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// State of the owned runtime process; `Idle` when none is running.
    pub async fn process_state(&self) -> ProcessState {
        let connection = self.inner.connection.lock().await;
        connection
            .as_ref()
            .and_then(|c| c.process.as_ref())
            .map(RuntimeProcess::state)
            .unwrap_or(ProcessState::Idle)
    }

    /// PID of the owned runtime process.
    pub async fn pid(&self) -> Option<u32> {
        let connection = self.inner.connection.lock().await;
        connection
            .as_ref()
            .and_then(|c| c.process.as_ref())
            .and_then(RuntimeProcess::pid)
    }

    fn set_state(&self, state: ConnectionState) {
        set_state(&self.inner, state);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the runtime (or connect to the external server) and verify the
    /// protocol version. A no-op when already connected.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.inner.connection.lock().await;
        if slot.as_ref().is_some_and(Connection::is_alive) {
            return Ok(());
        }
        if self.inner.stream_backed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLost(
                "stream transport closed and cannot be reopened".to_string(),
            ));
        }
        if let Some(stale) = slot.take() {
            teardown(stale, true).await;
        }
        *self.inner.models.lock().await = None;

        self.set_state(ConnectionState::Starting);
        match self.connect().await {
            Ok(connection) => {
                *slot = Some(connection);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start Copilot CLI: {e}");
                self.set_state(ConnectionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Destroy every session, close the transport and stop the runtime.
    ///
    /// Returns the errors met while destroying sessions; teardown always
    /// completes.
    pub async fn stop(&self) -> Vec<Error> {
        let mut slot = self.inner.connection.lock().await;
        let Some(connection) = slot.take() else {
            self.set_state(ConnectionState::Disconnected);
            return Vec::new();
        };
        self.set_state(ConnectionState::Stopping);
        connection.stopping.store(true, Ordering::SeqCst);

        let sessions: Vec<Arc<SessionInner>> = connection.sessions.read().values().cloned().collect();
        let mut errors = Vec::new();
        for session in sessions {
            if session.is_closed() {
                continue;
            }
            if let Err(e) = Session::from_inner(session).destroy().await {
                log::warn!("Failed to destroy session during stop: {e}");
                errors.push(e);
            }
        }

        teardown(connection, false).await;
        *self.inner.models.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        log::info!("Copilot client stopped");
        errors
    }

    /// Tear everything down immediately, without destroying sessions.
    pub async fn force_stop(&self) {
        let mut slot = self.inner.connection.lock().await;
        if let Some(connection) = slot.take() {
            self.set_state(ConnectionState::Stopping);
            connection.stopping.store(true, Ordering::SeqCst);
            teardown(connection, true).await;
        }
        *self.inner.models.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect(&self) -> Result<Connection> {
        let options = &self.inner.options;
        if let Endpoint::External { host, port } = options.endpoint()? {
            log::info!("Connecting to external Copilot CLI at {host}:{port}");
            let stream = TcpStream::connect((host.as_str(), port)).await.map_err(|e| {
                Error::ConnectionLost(format!("failed to connect to {host}:{port}: {e}"))
            })?;
            let (reader, writer) = stream.into_split();
            return self.establish(None, Box::new(reader), Box::new(writer)).await;
        }

        let program = self.resolve_program().await?;
        let (process, reader, writer) = RuntimeProcess::launch(&program, options).await?;
        self.establish(Some(process), reader, writer).await
    }

    /// The executable to launch: explicit path, acquired runtime or `PATH`.
    async fn resolve_program(&self) -> Result<PathBuf> {
        let options = &self.inner.options;
        let path_var = std::env::var("PATH").ok();
        if let Some(path) = &options.cli_path {
            return Ok(process::resolve_cli_path(Some(path), path_var.as_deref()));
        }
        let Some(acquisition) = &options.acquisition else {
            return Ok(process::resolve_cli_path(None, path_var.as_deref()));
        };

        let acquirer = Acquirer::new(acquisition.acquire_options()?)
            .with_probe(Arc::new(RuntimeProbe::new(options)));
        let record = acquirer.acquire().await?;
        log::info!(
            "Using Copilot CLI {} at {}",
            record.version,
            record.executable.display()
        );
        Ok(record.executable)
    }

    /// Wire a transport to the router, run the handshake and start the monitor.
    async fn establish(
        &self,
        mut process: Option<RuntimeProcess>,
        reader: process::BoxedReader,
        writer: process::BoxedWriter,
    ) -> Result<Connection> {
        let mut rpc = RpcClient::new(reader, writer);
        let incoming = rpc
            .take_incoming()
            .ok_or_else(|| Error::Protocol("incoming channel already taken".to_string()))?;
        let rpc = Arc::new(rpc);
        let sessions: SessionRegistry = Arc::new(RwLock::new(HashMap::new()));
        let router = tokio::spawn(router::handle_incoming_messages(
            incoming,
            Arc::clone(&rpc),
            Arc::clone(&sessions),
        ));

        if let Err(e) = self.handshake(&rpc, process.as_ref()).await {
            router.abort();
            rpc.close("handshake failed").await;
            if let Some(process) = process.as_mut() {
                process.kill().await;
            }
            return Err(e);
        }
        if let Some(process) = &process {
            process.mark_ready();
            log::info!(
                "Copilot CLI ready: {} (pid {:?})",
                process.program().display(),
                process.pid()
            );
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let monitor = tokio::spawn(monitor_connection(
            Arc::downgrade(&self.inner),
            Arc::clone(&rpc),
            process.as_ref().map(RuntimeProcess::exit_watch),
            Arc::clone(&sessions),
            Arc::clone(&stopping),
        ));

        Ok(Connection {
            rpc,
            process,
            sessions,
            stopping,
            router,
            monitor,
        })
    }

    /// `ping` within `startup_timeout`, racing process exit.
    async fn handshake(&self, rpc: &RpcClient, process: Option<&RuntimeProcess>) -> Result<()> {
        let timeout = self.inner.options.startup_timeout;
        let ping = rpc.request("ping", Some(json!({ "message": null })), Some(timeout));

        let outcome = match process {
            Some(process) => {
                tokio::select! {
                    outcome = ping => outcome,
                    code = process.exited() => {
                        return Err(ProcessLaunchError::ExitedImmediately {
                            code,
                            stderr: process.stderr_snapshot(),
                        }
                        .into());
                    }
                }
            }
            None => ping.await,
        };

        let value = match outcome {
            Ok(value) => value,
            Err(e) if e.is_connection_lost() => {
                if let Some(process) = process {
                    let code = tokio::time::timeout(EXIT_CODE_GRACE, process.exited())
                        .await
                        .unwrap_or(None);
                    return Err(ProcessLaunchError::ExitedImmediately {
                        code,
                        stderr: process.stderr_snapshot(),
                    }
                    .into());
                }
                return Err(e.into());
            }
            Err(copilot_sdk_rpc::TransportError::Timeout { after, .. }) => {
                return Err(match process {
                    Some(process) => ProcessLaunchError::HandshakeTimeout {
                        after,
                        stderr: process.stderr_snapshot(),
                    }
                    .into(),
                    None => Error::Timeout {
                        method: "ping".to_string(),
                        after,
                    },
                });
            }
            Err(e) => return Err(e.into()),
        };

        let ping: PingResponse = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("invalid ping response: {e}")))?;
        check_protocol_version(ping.protocol_version)
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// The live transport and session registry, starting the client if allowed.
    async fn connection(&self) -> Result<(Arc<RpcClient>, SessionRegistry)> {
        {
            let slot = self.inner.connection.lock().await;
            if let Some(connection) = slot.as_ref().filter(|c| c.is_alive()) {
                return Ok((Arc::clone(&connection.rpc), Arc::clone(&connection.sessions)));
            }
        }
        if !self.inner.options.auto_start {
            return Err(Error::NotConnected);
        }
        self.start().await?;
        let slot = self.inner.connection.lock().await;
        slot.as_ref()
            .map(|c| (Arc::clone(&c.rpc), Arc::clone(&c.sessions)))
            .ok_or(Error::NotConnected)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let (rpc, _) = self.connection().await?;
        let value = rpc
            .request(method, Some(params), self.inner.options.request_timeout)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("invalid '{method}' result: {e}")))
    }

    /// Round-trip a message through the runtime.
    pub async fn ping(&self, message: Option<&str>) -> Result<PingResponse> {
        self.call("ping", json!({ "message": message })).await
    }

    pub async fn get_status(&self) -> Result<StatusResponse> {
        self.call("status.get", json!({})).await
    }

    pub async fn get_auth_status(&self) -> Result<AuthStatus> {
        self.call("auth.getStatus", json!({})).await
    }

    /// Models offered by the runtime, cached for the life of the connection.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        if let Some(models) = self.inner.models.lock().await.as_ref() {
            return Ok(models.clone());
        }
        let result: ListModelsResult = self.call("models.list", json!({})).await?;
        *self.inner.models.lock().await = Some(result.models.clone());
        Ok(result.models)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Create a session.
    ///
    /// Tool names must be unique. Duplicates are rejected here as
    /// [`Error::Configuration`] before anything is sent, so the runtime never
    /// sees them and no [`Error::Protocol`] is produced for this case.
    pub async fn create_session(&self, config: SessionConfig) -> Result<Session> {
        self.open_session("session.create", config).await
    }

    /// Re-attach to a session the runtime has recorded.
    ///
    /// Handlers and provider credentials are never persisted by the runtime
    /// and must be supplied again in `config`.
    pub async fn resume_session(
        &self,
        session_id: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Session> {
        let config = SessionConfig {
            session_id: Some(session_id.into()),
            ..config
        };
        self.open_session("session.resume", config).await
    }

    async fn open_session(&self, method: &str, config: SessionConfig) -> Result<Session> {
        let (params, tools, handlers) = config.into_parts()?;
        let requested_id = params.session_id.clone();
        let (rpc, sessions) = self.connection().await?;

        let params = serde_json::to_value(&params)
            .map_err(|e| Error::Protocol(format!("failed to encode {method} params: {e}")))?;
        let value = rpc
            .request(method, Some(params), self.inner.options.request_timeout)
            .await?;
        let created: SessionCreated = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("invalid '{method}' result: {e}")))?;

        if let Some(requested) = requested_id
            && requested != created.session_id
        {
            return Err(Error::Protocol(format!(
                "{method} returned session '{}' for requested id '{requested}'",
                created.session_id
            )));
        }

        let inner = SessionInner::new(
            created.session_id.clone(),
            created.workspace_path,
            rpc,
            self.inner.options.request_timeout,
            tools,
            handlers,
            &sessions,
        );
        let replaced = sessions
            .write()
            .insert(created.session_id.clone(), Arc::clone(&inner));
        if let Some(previous) = replaced {
            previous.mark_closed();
        }
        log::info!("Session {} opened via {method}", created.session_id);
        Ok(Session::from_inner(inner))
    }

    /// Sessions recorded by the runtime.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let result: ListSessionsResult = self.call("session.list", json!({})).await?;
        Ok(result.sessions)
    }

    /// Permanently delete a session's recorded state.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let (_, sessions) = self.connection().await?;
        let result: DeleteSessionResult = self
            .call("session.delete", json!({ "sessionId": session_id }))
            .await?;
        if !result.success {
            return Err(Error::Protocol(format!(
                "failed to delete session {session_id}: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )));
        }
        let local = sessions.write().remove(session_id);
        if let Some(local) = local {
            local.mark_closed();
        }
        Ok(())
    }

    /// Id of the most recently updated session, if any.
    pub async fn get_last_session_id(&self) -> Result<Option<String>> {
        let result: LastSessionIdResult = self.call("session.getLastId", json!({})).await?;
        Ok(result.session_id)
    }
}

fn set_state(inner: &ClientInner, state: ConnectionState) {
    let mut current = inner.state.lock();
    if *current != state {
        log::debug!("Client state {:?} -> {:?}", *current, state);
        *current = state;
    }
}

/// Refuse a runtime that does not speak our protocol version.
pub(crate) fn check_protocol_version(reported: Option<u32>) -> Result<()> {
    match reported {
        Some(SDK_PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(Error::Protocol(format!(
            "SDK protocol version mismatch: SDK expects version {SDK_PROTOCOL_VERSION}, \
             but server reports version {other}. Update the SDK or the server."
        ))),
        None => Err(Error::Protocol(format!(
            "SDK protocol version mismatch: SDK expects version {SDK_PROTOCOL_VERSION}, \
             but server does not report a protocol version."
        ))),
    }
}

fn close_sessions(sessions: &SessionRegistry) {
    let drained: Vec<Arc<SessionInner>> = sessions.write().drain().map(|(_, s)| s).collect();
    for session in drained {
        session.mark_closed();
    }
}

async fn teardown(mut connection: Connection, kill: bool) {
    connection.stopping.store(true, Ordering::SeqCst);
    connection.rpc.close("client stopped").await;
    close_sessions(&connection.sessions);
    connection.router.abort();
    connection.monitor.abort();
    if let Some(process) = connection.process.as_mut() {
        if kill {
            process.kill().await;
        } else {
            process.shutdown(SHUTDOWN_GRACE).await;
        }
    }
}

/// Watch for the runtime exiting or the transport dropping.
async fn monitor_connection(
    client: Weak<ClientInner>,
    rpc: Arc<RpcClient>,
    exit: Option<tokio::sync::watch::Receiver<Option<Option<i32>>>>,
    sessions: SessionRegistry,
    stopping: Arc<AtomicBool>,
) {
    let reason = match exit {
        Some(mut exit) => {
            let exited = tokio::select! {
                code = exit.wait_for(|e| e.is_some()) => Err(code.ok().and_then(|e| e.flatten())),
                reason = rpc.closed() => Ok(reason),
            };
            match exited {
                Ok(reason) => reason,
                Err(code) => {
                    let reason = format!("Copilot CLI exited with code {code:?}");
                    rpc.close(&reason).await;
                    reason
                }
            }
        }
        None => rpc.closed().await,
    };
    close_sessions(&sessions);

    if stopping.load(Ordering::SeqCst) {
        return;
    }
    log::warn!("Connection to Copilot CLI lost: {reason}");
    let Some(inner) = client.upgrade() else {
        return;
    };
    set_state(&inner, ConnectionState::Error(reason));

    let restartable = inner.options.auto_restart
        && !inner.options.is_external_server()
        && !inner.stream_backed.load(Ordering::SeqCst);
    if restartable {
        tokio::spawn(restart(Client { inner }));
    }
}

/// Boxed so the monitor's future type does not depend on `Client::start`.
fn restart(client: Client) -> BoxFuture<'static, ()> {
    async move {
        log::info!("Restarting Copilot CLI");
        if let Err(e) = client.start().await {
            log::error!("Copilot CLI restart failed: {e}");
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_check() {
        assert!(check_protocol_version(Some(SDK_PROTOCOL_VERSION)).is_ok());
        let err = check_protocol_version(Some(1)).unwrap_err();
        assert!(err.to_string().contains("server reports version 1"));
        assert!(matches!(check_protocol_version(None), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_new_validates_options() {
        let err = Client::new(ClientOptions {
            cli_url: Some("localhost:8080".to_string()),
            github_token: Some("gho_x".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_not_connected_without_auto_start() {
        let client = Client::new(ClientOptions {
            auto_start: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.list_sessions().await, Err(Error::NotConnected)));
        assert_eq!(client.process_state().await, ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_never_started() {
        let client = Client::new(ClientOptions::default()).unwrap();
        assert!(client.stop().await.is_empty());
        client.force_stop().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
