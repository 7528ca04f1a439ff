//! Shared integration test helpers for copilot-sdk.
//!
//! [`FakeRuntime`] plays the Copilot CLI on the far end of an in-memory
//! duplex stream, speaking the same `Content-Length` framed JSON-RPC.
//!
//! ```ignore
//! mod common;
//! use common::{FakeRuntime, connected_client};
//! ```
//!
//! The `#![allow(dead_code)]` attribute suppresses warnings when only a
//! subset of helpers are used per file.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use copilot_sdk::rpc::{RpcClient, RpcError};
use copilot_sdk::{Client, ClientOptions};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Knobs for the fake runtime's canned answers.
#[derive(Debug, Clone)]
pub struct FakeConfig {
    /// Reported by `ping`; `None` omits the field.
    pub protocol_version: Option<u32>,
    /// Result of `session.delete`.
    pub delete_success: bool,
    /// Per-method replacements for the default result.
    pub overrides: HashMap<String, Result<Value, RpcError>>,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: Some(2),
            delete_success: true,
            overrides: HashMap::new(),
        }
    }
}

/// The runtime side of an in-memory connection.
pub struct FakeRuntime {
    /// Use to send notifications and calls to the client.
    pub rpc: Arc<RpcClient>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeRuntime {
    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Params of every call to `method`.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Deliver a `session.event` notification.
    pub async fn emit(&self, session_id: &str, id: &str, event_type: &str, data: Value) {
        self.rpc
            .notify(
                "session.event",
                Some(json!({
                    "sessionId": session_id,
                    "event": {
                        "id": id,
                        "timestamp": "2026-01-01T00:00:00Z",
                        "type": event_type,
                        "data": data,
                    }
                })),
            )
            .await
            .expect("notify");
    }

    /// Call back into the client, as the runtime does for tools and prompts.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, copilot_sdk::rpc::TransportError> {
        self.rpc
            .request(method, Some(params), Some(std::time::Duration::from_secs(5)))
            .await
    }
}

fn default_result(config: &FakeConfig, method: &str, params: &Value) -> Result<Value, RpcError> {
    if let Some(result) = config.overrides.get(method) {
        return result.clone();
    }
    let session_id = params
        .get("sessionId")
        .and_then(Value::as_str)
        .unwrap_or("session-1")
        .to_string();
    Ok(match method {
        "ping" => {
            let mut result = json!({"message": "pong", "timestamp": 1_700_000_000_000_i64});
            if let Some(version) = config.protocol_version {
                result["protocolVersion"] = json!(version);
            }
            result
        }
        "status.get" => json!({"version": "1.2.3", "protocolVersion": 2}),
        "auth.getStatus" => json!({"isAuthenticated": true, "authType": "user", "login": "octocat"}),
        "models.list" => json!({"models": [{"id": "gpt-5", "name": "GPT-5", "capabilities": {}}]}),
        "session.create" | "session.resume" => {
            json!({"sessionId": session_id, "workspacePath": "/tmp/workspace"})
        }
        "session.send" => json!({"messageId": "msg-1"}),
        "session.getMessages" => json!({"events": []}),
        "session.abort" | "session.destroy" => json!({}),
        "session.list" => json!({"sessions": [
            {"sessionId": "session-1", "summary": "first", "isRemote": false}
        ]}),
        "session.delete" => {
            if config.delete_success {
                json!({"success": true})
            } else {
                json!({"success": false, "error": "not found"})
            }
        }
        "session.getLastId" => json!({"sessionId": "session-1"}),
        other => return Err(RpcError::method_not_found(other)),
    })
}

/// Build a client and a fake runtime joined by an in-memory stream.
pub async fn connected_client_with(
    options: ClientOptions,
    config: FakeConfig,
) -> (copilot_sdk::Result<Client>, FakeRuntime) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let mut server = RpcClient::new(server_read, server_write);
    let mut incoming = server.take_incoming().expect("incoming");
    let server = Arc::new(server);
    let calls = Arc::new(Mutex::new(Vec::new()));

    {
        let server = Arc::clone(&server);
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            while let Some(msg) = incoming.recv().await {
                if !msg.is_rpc_call() {
                    continue;
                }
                let (Some(id), Some(method)) = (msg.id, msg.method) else {
                    continue;
                };
                let params = msg.params.unwrap_or(Value::Null);
                calls.lock().push((method.clone(), params.clone()));
                let outcome = default_result(&config, &method, &params);
                let _ = server.respond(id, outcome).await;
            }
        });
    }

    let (client_read, client_write) = tokio::io::split(client_io);
    let client = Client::from_stream(options, client_read, client_write).await;
    (client, FakeRuntime { rpc: server, calls })
}

/// A connected client with default options and canned answers.
pub async fn connected_client() -> (Client, FakeRuntime) {
    let (client, runtime) =
        connected_client_with(ClientOptions::default(), FakeConfig::default()).await;
    (client.expect("handshake"), runtime)
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}
