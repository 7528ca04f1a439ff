//! Session event types delivered through `session.event` notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator of a [`SessionEvent`].
///
/// Unknown types are preserved in [`SessionEventType::Other`] so newer
/// runtimes never break event delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionEventType {
    AssistantMessage,
    AssistantMessageDelta,
    AssistantReasoning,
    AssistantReasoningDelta,
    AssistantTurnStart,
    AssistantTurnEnd,
    AssistantUsage,
    ToolExecutionStart,
    ToolExecutionProgress,
    ToolExecutionComplete,
    UserMessage,
    SessionStart,
    SessionResume,
    SessionIdle,
    SessionError,
    SessionInfo,
    SessionModelChange,
    SessionIdleWarning,
    SessionTimeout,
    SessionDestroyed,
    Abort,
    HookStart,
    HookEnd,
    Other(String),
}

impl SessionEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AssistantMessage => "assistant.message",
            Self::AssistantMessageDelta => "assistant.message_delta",
            Self::AssistantReasoning => "assistant.reasoning",
            Self::AssistantReasoningDelta => "assistant.reasoning_delta",
            Self::AssistantTurnStart => "assistant.turn_start",
            Self::AssistantTurnEnd => "assistant.turn_end",
            Self::AssistantUsage => "assistant.usage",
            Self::ToolExecutionStart => "tool.execution_start",
            Self::ToolExecutionProgress => "tool.execution_progress",
            Self::ToolExecutionComplete => "tool.execution_complete",
            Self::UserMessage => "user.message",
            Self::SessionStart => "session.start",
            Self::SessionResume => "session.resume",
            Self::SessionIdle => "session.idle",
            Self::SessionError => "session.error",
            Self::SessionInfo => "session.info",
            Self::SessionModelChange => "session.model_change",
            Self::SessionIdleWarning => "session.idle_warning",
            Self::SessionTimeout => "session.timeout",
            Self::SessionDestroyed => "session.destroyed",
            Self::Abort => "abort",
            Self::HookStart => "hook.start",
            Self::HookEnd => "hook.end",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for SessionEventType {
    fn from(s: &str) -> Self {
        match s {
            "assistant.message" => Self::AssistantMessage,
            "assistant.message_delta" => Self::AssistantMessageDelta,
            "assistant.reasoning" => Self::AssistantReasoning,
            "assistant.reasoning_delta" => Self::AssistantReasoningDelta,
            "assistant.turn_start" => Self::AssistantTurnStart,
            "assistant.turn_end" => Self::AssistantTurnEnd,
            "assistant.usage" => Self::AssistantUsage,
            "tool.execution_start" => Self::ToolExecutionStart,
            "tool.execution_progress" => Self::ToolExecutionProgress,
            "tool.execution_complete" => Self::ToolExecutionComplete,
            "user.message" => Self::UserMessage,
            "session.start" => Self::SessionStart,
            "session.resume" => Self::SessionResume,
            "session.idle" => Self::SessionIdle,
            "session.error" => Self::SessionError,
            "session.info" => Self::SessionInfo,
            "session.model_change" => Self::SessionModelChange,
            "session.idle_warning" => Self::SessionIdleWarning,
            "session.timeout" => Self::SessionTimeout,
            "session.destroyed" => Self::SessionDestroyed,
            "abort" => Self::Abort,
            "hook.start" => Self::HookStart,
            "hook.end" => Self::HookEnd,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for SessionEventType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<SessionEventType> for String {
    fn from(t: SessionEventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in a session's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    #[serde(rename = "type")]
    pub event_type: SessionEventType,
    #[serde(default)]
    pub data: Value,
}

impl SessionEvent {
    /// `data.content` for message-like events.
    pub fn content(&self) -> Option<&str> {
        self.data.get("content").and_then(|v| v.as_str())
    }

    /// `data.deltaContent` for streaming deltas.
    pub fn delta_content(&self) -> Option<&str> {
        self.data.get("deltaContent").and_then(|v| v.as_str())
    }

    /// `data.message` for error and info events.
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(|v| v.as_str())
    }

    pub fn is(&self, event_type: &SessionEventType) -> bool {
        &self.event_type == event_type
    }
}

/// Params of the `session.event` notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub session_id: String,
    pub event: SessionEvent,
}

/// Result of `session.getMessages`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetMessagesResult {
    #[serde(default)]
    pub events: Vec<SessionEvent>,
}
