//! User-facing configuration for `create_session` and `resume_session`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::handlers::{
    PermissionHandler, SessionHandlers, SessionHooks, ToolErrorHandler, UserInputHandler,
};
use crate::protocol::{
    CustomAgentConfig, InfiniteSessionConfig, ProviderConfig, SessionParams, SystemMessageConfig,
};
use crate::tools::{Tool, index_tools};

/// Everything a session is created or resumed with.
///
/// Handlers stay in the process; only their presence is announced to the
/// runtime. Provider credentials are never persisted by the runtime and must
/// be passed again on resume.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Caller-chosen session id. The runtime generates one when unset.
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub tools: Vec<Tool>,
    pub system_message: Option<SystemMessageConfig>,
    pub available_tools: Option<Vec<String>>,
    pub excluded_tools: Option<Vec<String>>,
    pub provider: Option<ProviderConfig>,
    pub working_directory: Option<PathBuf>,
    /// Emit `assistant.message_delta` events.
    pub streaming: Option<bool>,
    pub mcp_servers: Option<HashMap<String, Value>>,
    pub custom_agents: Option<Vec<CustomAgentConfig>>,
    pub config_dir: Option<PathBuf>,
    pub skill_directories: Option<Vec<PathBuf>>,
    pub disabled_skills: Option<Vec<String>>,
    pub infinite_sessions: Option<InfiniteSessionConfig>,
    /// Resume only: skip the `session.resume` event.
    pub disable_resume: bool,
    pub on_permission_request: Option<PermissionHandler>,
    pub hooks: SessionHooks,
    pub on_user_input_request: Option<UserInputHandler>,
    pub on_tool_error: Option<ToolErrorHandler>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(Tool::name).collect::<Vec<_>>())
            .field("provider", &self.provider)
            .field("working_directory", &self.working_directory)
            .field("skill_directories", &self.skill_directories)
            .field("has_permission_handler", &self.on_permission_request.is_some())
            .field("hooks", &self.hooks)
            .field("has_user_input_handler", &self.on_user_input_request.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_skill_directories(mut self, dirs: Vec<PathBuf>) -> Self {
        self.skill_directories = Some(dirs);
        self
    }

    pub fn with_disabled_skills(mut self, skills: Vec<String>) -> Self {
        self.disabled_skills = Some(skills);
        self
    }

    pub fn with_permission_handler(mut self, handler: PermissionHandler) -> Self {
        self.on_permission_request = Some(handler);
        self
    }

    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_user_input_handler(mut self, handler: UserInputHandler) -> Self {
        self.on_user_input_request = Some(handler);
        self
    }

    pub fn with_tool_error_handler(mut self, handler: ToolErrorHandler) -> Self {
        self.on_tool_error = Some(handler);
        self
    }

    /// Split into wire params and the local tool and handler state.
    ///
    /// Fails with a configuration error on duplicate tool names.
    pub(crate) fn into_parts(
        self,
    ) -> Result<(SessionParams, Arc<HashMap<String, Tool>>, SessionHandlers)> {
        let tools = index_tools(&self.tools)?;
        let params = SessionParams {
            session_id: self.session_id,
            model: self.model,
            reasoning_effort: self.reasoning_effort,
            tools: self.tools.iter().map(Tool::definition).collect(),
            system_message: self.system_message,
            available_tools: self.available_tools,
            excluded_tools: self.excluded_tools,
            provider: self.provider,
            request_permission: self.on_permission_request.is_some(),
            request_user_input: self.on_user_input_request.is_some(),
            hooks: !self.hooks.is_empty(),
            working_directory: self.working_directory,
            streaming: self.streaming,
            mcp_servers: self.mcp_servers,
            custom_agents: self.custom_agents,
            config_dir: self.config_dir,
            skill_directories: self.skill_directories,
            disabled_skills: self.disabled_skills,
            infinite_sessions: self.infinite_sessions,
            disable_resume: self.disable_resume,
        };
        let handlers = SessionHandlers {
            permission: self.on_permission_request,
            hooks: self.hooks,
            user_input: self.on_user_input_request,
            tool_error: self.on_tool_error,
        };
        Ok((params, Arc::new(tools), handlers))
    }
}
