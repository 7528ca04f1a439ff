//! Background router for incoming JSON-RPC messages from the runtime.
//!
//! Notifications are delivered to session subscribers on this task, in
//! arrival order. Calls are answered on their own tasks so a slow tool never
//! blocks event delivery.

use std::sync::Arc;

use copilot_sdk_rpc::{IncomingMessage, RpcClient};
use tokio::sync::mpsc;

use crate::bridge;
use crate::protocol::{SessionEventParams, SessionEventType};
use crate::session::SessionRegistry;

/// Read incoming messages until the transport closes.
///
/// # Routing
///
/// - `session.event` notifications → subscribers of the addressed session
/// - `tool.call`, `permission.request`, `hooks.invoke`, `userInput.request`
///   → [`bridge::dispatch`], answered with the same correlation id
/// - Unknown calls → JSON-RPC "Method not found"
pub(crate) async fn handle_incoming_messages(
    mut incoming_rx: mpsc::UnboundedReceiver<IncomingMessage>,
    rpc: Arc<RpcClient>,
    sessions: SessionRegistry,
) {
    while let Some(msg) = incoming_rx.recv().await {
        let Some(method) = msg.method.clone() else {
            continue;
        };

        if msg.is_notification() {
            match method.as_str() {
                "session.event" => route_session_event(&sessions, msg.params),
                _ => log::debug!("Ignoring notification {method}"),
            }
        } else if msg.is_rpc_call() {
            let Some(request_id) = msg.id else {
                continue;
            };
            log::debug!("RPC call from runtime: method={method} id={request_id}");

            let rpc = Arc::clone(&rpc);
            let sessions = Arc::clone(&sessions);
            let params = msg.params;
            tokio::spawn(async move {
                let outcome = bridge::dispatch(&sessions, &method, params).await;
                if let Err(e) = rpc.respond(request_id, outcome).await {
                    log::error!("Failed to answer {method}: {e}");
                }
            });
        }
    }
    log::debug!("Incoming message router stopped");
}

fn route_session_event(sessions: &SessionRegistry, params: Option<serde_json::Value>) {
    let Some(params) = params else {
        log::error!("session.event without params");
        return;
    };
    let params: SessionEventParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            log::error!("Failed to parse session.event params: {e}");
            return;
        }
    };

    let session = sessions.read().get(&params.session_id).cloned();
    let Some(session) = session else {
        log::debug!(
            "Dropping {} event for unknown session {}",
            params.event.event_type.as_str(),
            params.session_id
        );
        return;
    };

    session.dispatch(&params.event);

    if params.event.is(&SessionEventType::SessionDestroyed) {
        session.mark_closed();
        session.unregister();
    }
}
