//! Callback bridge: answers calls the runtime makes into the client.
//!
//! Every call resolves to exactly one response. Handler failures are
//! contained here: the runtime only ever sees generic failure results.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use copilot_sdk_rpc::RpcError;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ToolExecutionError;
use crate::protocol::{
    HookInvocation, PermissionOutcome, PermissionRequest, PermissionRequestParams,
    PermissionResult, ToolInvocation, ToolResult, UserInputRequest,
};
use crate::session::{SessionInner, SessionRegistry};

/// Error code used when the client cannot serve a well-formed call.
const HANDLER_UNAVAILABLE: i64 = -32000;

/// Route one server-initiated call to its handler.
pub(crate) async fn dispatch(
    sessions: &SessionRegistry,
    method: &str,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    match method {
        "tool.call" => {
            let invocation: ToolInvocation = parse_params(method, params)?;
            let session = lookup(sessions, &invocation.session_id)?;
            let result = handle_tool_call(session, invocation).await;
            Ok(json!({ "result": result }))
        }
        "permission.request" => {
            let request: PermissionRequestParams = parse_params(method, params)?;
            let session = lookup(sessions, &request.session_id)?;
            let result = PermissionResult {
                kind: request_permission(&session, request.permission_request).await,
            };
            Ok(json!({ "result": result }))
        }
        "hooks.invoke" => {
            let invocation: HookInvocation = parse_params(method, params)?;
            let session = lookup(sessions, &invocation.session_id)?;
            Ok(handle_hook(&session, invocation).await)
        }
        "userInput.request" => {
            let request: UserInputRequest = parse_params(method, params)?;
            let session = lookup(sessions, &request.session_id)?;
            handle_user_input(&session, request).await
        }
        _ => {
            log::error!("Unknown RPC call method: {method}");
            Err(RpcError::method_not_found(method))
        }
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        log::error!("Failed to parse {method} params: {e}");
        RpcError::invalid_params(e)
    })
}

fn lookup(sessions: &SessionRegistry, session_id: &str) -> Result<Arc<SessionInner>, RpcError> {
    sessions
        .read()
        .get(session_id)
        .cloned()
        .ok_or_else(|| RpcError::invalid_params(format!("unknown session {session_id}")))
}

// ---------------------------------------------------------------------------
// tool.call
// ---------------------------------------------------------------------------

async fn handle_tool_call(session: Arc<SessionInner>, invocation: ToolInvocation) -> ToolResult {
    if session.tool(&invocation.tool_name).is_none() {
        log::warn!(
            "Session {}: runtime called unregistered tool '{}'",
            session.id(),
            invocation.tool_name
        );
        return ToolResult::unsupported(&invocation.tool_name);
    }

    tokio::select! {
        result = run_tool(&session, invocation.clone()) => result,
        _ = session.cancelled() => {
            log::info!(
                "Session {}: tool call {} cancelled by destroy",
                session.id(),
                invocation.tool_call_id
            );
            ToolResult {
                error: Some("cancelled".to_string()),
                ..ToolResult::denied("The tool call was cancelled because the session was destroyed.")
            }
        }
    }
}

async fn run_tool(session: &Arc<SessionInner>, invocation: ToolInvocation) -> ToolResult {
    let Some(tool) = session.tool(&invocation.tool_name).cloned() else {
        return ToolResult::unsupported(&invocation.tool_name);
    };

    if tool.needs_approval() {
        let request = PermissionRequest::custom_tool(
            &invocation.tool_call_id,
            &invocation.tool_name,
            &invocation.arguments,
        );
        if !request_permission(session, request).await.is_approved() {
            return ToolResult::denied(format!(
                "Permission to run tool '{}' was not granted.",
                invocation.tool_name
            ));
        }
    }

    let session_id = invocation.session_id.clone();
    let tool_call_id = invocation.tool_call_id.clone();
    let tool_name = invocation.tool_name.clone();

    let (message, panicked) = match AssertUnwindSafe(tool.invoke(invocation))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => return result,
        Ok(Err(e)) => (e.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };

    let error = ToolExecutionError {
        session_id,
        tool_call_id,
        tool_name,
        message,
        panicked,
    };
    log::warn!("{error}");
    if let Some(handler) = &session.handlers().tool_error
        && std::panic::catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err()
    {
        log::error!("Tool error handler panicked for call {}", error.tool_call_id);
    }
    ToolResult::handler_failed()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// permission.request
// ---------------------------------------------------------------------------

/// Ask the session's permission handler. No handler, an error or a panic
/// all count as "could not request from user".
async fn request_permission(
    session: &Arc<SessionInner>,
    request: PermissionRequest,
) -> PermissionOutcome {
    let Some(handler) = session.handlers().permission.clone() else {
        return PermissionOutcome::DeniedNoApprovalRule;
    };
    let kind = request.kind.clone();
    match AssertUnwindSafe(handler(request, session.id().to_string()))
        .catch_unwind()
        .await
    {
        Ok(Ok(outcome)) => {
            log::debug!("Session {}: permission '{kind}' -> {}", session.id(), outcome.as_str());
            outcome
        }
        Ok(Err(e)) => {
            log::warn!("Session {}: permission handler failed: {e}", session.id());
            PermissionOutcome::DeniedNoApprovalRule
        }
        Err(_) => {
            log::error!("Session {}: permission handler panicked", session.id());
            PermissionOutcome::DeniedNoApprovalRule
        }
    }
}

// ---------------------------------------------------------------------------
// hooks.invoke / userInput.request
// ---------------------------------------------------------------------------

/// Run the hook handler for the invocation's type. A missing or failing
/// handler produces no output rather than an error.
async fn handle_hook(session: &Arc<SessionInner>, invocation: HookInvocation) -> Value {
    let Some(handler) = session.handlers().hooks.get(&invocation.hook_type).cloned() else {
        return json!({});
    };
    let hook_type = invocation.hook_type.as_str().to_string();
    match AssertUnwindSafe(handler(invocation)).catch_unwind().await {
        Ok(Ok(Some(output))) => json!({ "output": output }),
        Ok(Ok(None)) => json!({}),
        Ok(Err(e)) => {
            log::warn!("Session {}: hook '{hook_type}' failed: {e}", session.id());
            json!({})
        }
        Err(_) => {
            log::error!("Session {}: hook '{hook_type}' panicked", session.id());
            json!({})
        }
    }
}

async fn handle_user_input(
    session: &Arc<SessionInner>,
    request: UserInputRequest,
) -> Result<Value, RpcError> {
    let Some(handler) = session.handlers().user_input.clone() else {
        return Err(RpcError::new(
            HANDLER_UNAVAILABLE,
            "user input requested but no handler is registered",
        ));
    };
    match AssertUnwindSafe(handler(request)).catch_unwind().await {
        Ok(Ok(response)) => serde_json::to_value(response)
            .map_err(|e| RpcError::internal(format!("failed to encode answer: {e}"))),
        Ok(Err(e)) => {
            log::warn!("Session {}: user input handler failed: {e}", session.id());
            Err(RpcError::new(HANDLER_UNAVAILABLE, "user input handler failed"))
        }
        Err(_) => {
            log::error!("Session {}: user input handler panicked", session.id());
            Err(RpcError::new(HANDLER_UNAVAILABLE, "user input handler failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use copilot_sdk_rpc::RpcClient;
    use copilot_sdk_rpc::message::{INVALID_PARAMS, METHOD_NOT_FOUND};
    use parking_lot::{Mutex, RwLock};

    use crate::error::HandlerError;
    use crate::handlers::{SessionHandlers, approve_all, permission_handler};
    use crate::protocol::{TOOL_FAILURE_TEXT, ToolResultType};
    use crate::tools::{Tool, index_tools};

    fn registry_with(tools: Vec<Tool>, handlers: SessionHandlers) -> SessionRegistry {
        let (client_io, _server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_io);
        let rpc = Arc::new(RpcClient::new(reader, writer));
        let registry: SessionRegistry = Arc::new(RwLock::new(HashMap::new()));
        let inner = SessionInner::new(
            "s1".to_string(),
            None,
            rpc,
            None,
            Arc::new(index_tools(&tools).unwrap()),
            handlers,
            &registry,
        );
        registry.write().insert("s1".to_string(), inner);
        registry
    }

    fn tool_call(name: &str) -> Option<Value> {
        Some(json!({
            "sessionId": "s1",
            "toolCallId": "c1",
            "toolName": name,
            "arguments": {"x": 1}
        }))
    }

    fn failing_tool() -> Tool {
        Tool::new("boom", "fails", |_inv| async {
            Err::<ToolResult, HandlerError>("secret database password".into())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let err = dispatch(&registry, "nope.nope", None).await.unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_session_is_invalid_params() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let params = Some(json!({"sessionId": "other", "toolCallId": "c", "toolName": "t"}));
        let err = dispatch(&registry, "tool.call", params).await.unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unregistered_tool() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let value = dispatch(&registry, "tool.call", tool_call("missing_tool"))
            .await
            .unwrap();
        assert_eq!(value["result"]["resultType"], "failure");
        assert_eq!(value["result"]["error"], "tool 'missing_tool' not supported");
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let reported = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&reported);
        let handlers = SessionHandlers {
            tool_error: Some(Arc::new(move |e: &ToolExecutionError| {
                *sink.lock() = Some(e.clone());
            })),
            ..Default::default()
        };
        let registry = registry_with(vec![failing_tool()], handlers);

        let value = dispatch(&registry, "tool.call", tool_call("boom")).await.unwrap();
        let text = value.to_string();
        assert!(!text.contains("secret database password"));
        assert_eq!(value["result"]["textResultForLlm"], TOOL_FAILURE_TEXT);
        assert_eq!(value["result"]["error"], "tool execution failed");

        let reported = reported.lock().clone().unwrap();
        assert_eq!(reported.tool_name, "boom");
        assert!(reported.message.contains("secret database password"));
        assert!(!reported.panicked);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let tool = Tool::new("panics", "panics", |_inv| async {
            if true {
                panic!("index out of bounds");
            }
            Ok::<_, HandlerError>(ToolResult::success("unreachable"))
        })
        .unwrap();
        let registry = registry_with(vec![tool], SessionHandlers::default());
        let value = dispatch(&registry, "tool.call", tool_call("panics")).await.unwrap();
        assert_eq!(value["result"]["resultType"], "failure");
        assert!(!value.to_string().contains("index out of bounds"));
    }

    #[tokio::test]
    async fn test_approval_required_without_handler_is_denied() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let tool = Tool::new("deploy", "deploys", move |_inv| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, HandlerError>(ToolResult::success("deployed"))
            }
        })
        .unwrap()
        .requires_approval(true);
        let registry = registry_with(vec![tool], SessionHandlers::default());

        let value = dispatch(&registry, "tool.call", tool_call("deploy")).await.unwrap();
        assert_eq!(value["result"]["resultType"], "denied");
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_approval_granted_runs_tool() {
        let tool = Tool::new("deploy", "deploys", |_inv| async {
            Ok::<_, HandlerError>(ToolResult::success("deployed"))
        })
        .unwrap()
        .requires_approval(true);
        let handlers = SessionHandlers {
            permission: Some(approve_all()),
            ..Default::default()
        };
        let registry = registry_with(vec![tool], handlers);

        let value = dispatch(&registry, "tool.call", tool_call("deploy")).await.unwrap();
        assert_eq!(value["result"]["resultType"], "success");
        assert_eq!(value["result"]["textResultForLlm"], "deployed");
    }

    #[tokio::test]
    async fn test_permission_request_without_handler() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let params = Some(json!({"sessionId": "s1", "permissionRequest": {"kind": "shell"}}));
        let value = dispatch(&registry, "permission.request", params).await.unwrap();
        assert_eq!(
            value["result"]["kind"],
            "denied-no-approval-rule-and-could-not-request-from-user"
        );
    }

    #[tokio::test]
    async fn test_permission_request_handler_sees_kind() {
        let handlers = SessionHandlers {
            permission: Some(permission_handler(|req: PermissionRequest, _sid| async move {
                Ok::<_, HandlerError>(if req.kind == "read" {
                    PermissionOutcome::Approved
                } else {
                    PermissionOutcome::DeniedInteractivelyByUser
                })
            })),
            ..Default::default()
        };
        let registry = registry_with(vec![], handlers);
        let params = Some(json!({"sessionId": "s1", "permissionRequest": {"kind": "write"}}));
        let value = dispatch(&registry, "permission.request", params).await.unwrap();
        assert_eq!(value["result"]["kind"], "denied-interactively-by-user");
    }

    #[tokio::test]
    async fn test_hook_without_handler_returns_empty() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let params = Some(json!({"sessionId": "s1", "hookType": "preToolUse", "input": {}}));
        let value = dispatch(&registry, "hooks.invoke", params).await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn test_user_input_without_handler_is_error() {
        let registry = registry_with(vec![], SessionHandlers::default());
        let params = Some(json!({"sessionId": "s1", "question": "Continue?"}));
        let err = dispatch(&registry, "userInput.request", params).await.unwrap_err();
        assert_eq!(err.code, HANDLER_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_destroy_cancels_in_flight_tool() {
        let tool = Tool::new("slow", "never finishes", |_inv| async {
            std::future::pending::<()>().await;
            Ok::<_, HandlerError>(ToolResult::success("never"))
        })
        .unwrap();
        let registry = registry_with(vec![tool], SessionHandlers::default());
        let session = registry.read().get("s1").cloned().unwrap();

        let call = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { dispatch(&registry, "tool.call", tool_call("slow")).await }
        });
        tokio::task::yield_now().await;
        session.mark_closed();

        let value = tokio::time::timeout(std::time::Duration::from_secs(2), call)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let result: ToolResult = serde_json::from_value(value["result"].clone()).unwrap();
        assert_eq!(result.result_type, ToolResultType::Denied);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }
}
