//! Callback signatures for session events and server-initiated requests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{HandlerError, ToolExecutionError};
use crate::protocol::{
    HookInvocation, HookType, PermissionOutcome, PermissionRequest, SessionEvent,
    UserInputRequest, UserInputResponse,
};

/// Synchronous event subscriber, run on the router task.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Decides a permission request. The second argument is the session id.
pub type PermissionHandler = Arc<
    dyn Fn(PermissionRequest, String) -> BoxFuture<'static, Result<PermissionOutcome, HandlerError>>
        + Send
        + Sync,
>;

/// Handles one hook invocation. `Some(value)` is returned as the hook output.
pub type HookHandler =
    Arc<dyn Fn(HookInvocation) -> BoxFuture<'static, Result<Option<Value>, HandlerError>> + Send + Sync>;

/// Answers a question the agent asks the user.
pub type UserInputHandler = Arc<
    dyn Fn(UserInputRequest) -> BoxFuture<'static, Result<UserInputResponse, HandlerError>>
        + Send
        + Sync,
>;

/// Receives the local detail of a failed tool call.
pub type ToolErrorHandler = Arc<dyn Fn(&ToolExecutionError) + Send + Sync>;

/// Wrap an async closure as a [`PermissionHandler`].
pub fn permission_handler<F, Fut>(f: F) -> PermissionHandler
where
    F: Fn(PermissionRequest, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionOutcome, HandlerError>> + Send + 'static,
{
    Arc::new(move |request, session_id| f(request, session_id).boxed())
}

/// Wrap an async closure as a [`UserInputHandler`].
pub fn user_input_handler<F, Fut>(f: F) -> UserInputHandler
where
    F: Fn(UserInputRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<UserInputResponse, HandlerError>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Permission handler that approves everything.
pub fn approve_all() -> PermissionHandler {
    permission_handler(|_request, _session_id| async { Ok::<_, HandlerError>(PermissionOutcome::Approved) })
}

/// Hook handlers of a session, keyed by hook type.
#[derive(Clone, Default)]
pub struct SessionHooks {
    handlers: HashMap<HookType, HookHandler>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for `hook_type`, replacing any earlier handler.
    pub fn on<F, Fut>(mut self, hook_type: HookType, f: F) -> Self
    where
        F: Fn(HookInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(hook_type, Arc::new(move |invocation| f(invocation).boxed()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, hook_type: &HookType) -> Option<&HookHandler> {
        self.handlers.get(hook_type)
    }
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(HookType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("SessionHooks").field("types", &types).finish()
    }
}

/// Handlers attached to a live session.
#[derive(Clone, Default)]
pub(crate) struct SessionHandlers {
    pub permission: Option<PermissionHandler>,
    pub hooks: SessionHooks,
    pub user_input: Option<UserInputHandler>,
    pub tool_error: Option<ToolErrorHandler>,
}
