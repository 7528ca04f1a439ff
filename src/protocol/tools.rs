//! Tool call wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text sent to the model when a handler fails. Handler detail never crosses the wire.
pub const TOOL_FAILURE_TEXT: &str =
    "Invoking this tool produced an error. Detailed information is not available.";

/// Outcome category of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultType {
    Success,
    Failure,
    Rejected,
    Denied,
}

/// Result of a tool call, returned to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub text_result_for_llm: String,
    pub result_type: ToolResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_telemetry: Option<Value>,
}

impl ToolResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            result_type: ToolResultType::Success,
            error: None,
            session_log: None,
            tool_telemetry: None,
        }
    }

    /// Successful result carrying structured data, serialized as the model text.
    pub fn json(value: &Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn failure(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            result_type: ToolResultType::Failure,
            error: Some(error.into()),
            session_log: None,
            tool_telemetry: None,
        }
    }

    pub fn denied(text: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            result_type: ToolResultType::Denied,
            error: None,
            session_log: None,
            tool_telemetry: None,
        }
    }

    /// The generic failure sent when a handler errors or panics.
    pub(crate) fn handler_failed() -> Self {
        Self::failure(TOOL_FAILURE_TEXT, "tool execution failed")
    }

    /// The failure sent for a tool the session never registered.
    pub(crate) fn unsupported(tool_name: &str) -> Self {
        Self::failure(
            format!("Tool '{tool_name}' is not supported by this client instance."),
            format!("tool '{tool_name}' not supported"),
        )
    }

    pub fn with_telemetry(mut self, telemetry: Value) -> Self {
        self.tool_telemetry = Some(telemetry);
        self
    }

    pub fn with_session_log(mut self, log: impl Into<String>) -> Self {
        self.session_log = Some(log.into());
        self
    }
}

impl From<String> for ToolResult {
    fn from(text: String) -> Self {
        Self::success(text)
    }
}

impl From<&str> for ToolResult {
    fn from(text: &str) -> Self {
        Self::success(text)
    }
}

/// A tool as advertised to the runtime. Handlers never cross the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Params of the server-initiated `tool.call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}
