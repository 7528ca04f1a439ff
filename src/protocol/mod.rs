//! Copilot CLI server protocol type definitions.
//!
//! These types model the JSON-RPC parameter and result objects exchanged
//! between the SDK and the runtime. All wire names are camelCase.
//!
//! - [`session`] - create/resume params, send options, session listings
//! - [`events`] - `session.event` notifications
//! - [`tools`] - `tool.call` params and [`ToolResult`]
//! - [`permissions`] - `permission.request` and outcomes
//! - [`callbacks`] - `hooks.invoke` and `userInput.request`
//! - [`status`] - `ping`, `status.get`, `auth.getStatus`, `models.list`

pub mod callbacks;
pub mod events;
pub mod permissions;
pub mod session;
pub mod status;
pub mod tools;

pub use callbacks::{HookInvocation, HookType, UserInputRequest, UserInputResponse};
pub use events::{GetMessagesResult, SessionEvent, SessionEventParams, SessionEventType};
pub use permissions::{
    CUSTOM_TOOL_KIND, PermissionOutcome, PermissionRequest, PermissionRequestParams,
    PermissionResult,
};
pub use session::{
    Attachment, AzureProviderOptions, CustomAgentConfig, DeleteSessionResult,
    InfiniteSessionConfig, LastSessionIdResult, ListSessionsResult, MessageOptions,
    ProviderConfig, SendResult, SessionCreated, SessionMetadata, SessionParams,
    SystemMessageConfig, SystemMessageMode,
};
pub use status::{
    AuthStatus, ListModelsResult, ModelInfo, PingResponse, SDK_PROTOCOL_VERSION, StatusResponse,
};
pub use tools::{TOOL_FAILURE_TEXT, ToolDefinition, ToolInvocation, ToolResult, ToolResultType};
