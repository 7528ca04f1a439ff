//! Hook and user-input callback types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle points at which the runtime invokes session hooks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    UserPromptSubmitted,
    SessionStart,
    SessionEnd,
    ErrorOccurred,
    Other(String),
}

impl HookType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PreToolUse => "preToolUse",
            Self::PostToolUse => "postToolUse",
            Self::UserPromptSubmitted => "userPromptSubmitted",
            Self::SessionStart => "sessionStart",
            Self::SessionEnd => "sessionEnd",
            Self::ErrorOccurred => "errorOccurred",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for HookType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "preToolUse" => Self::PreToolUse,
            "postToolUse" => Self::PostToolUse,
            "userPromptSubmitted" => Self::UserPromptSubmitted,
            "sessionStart" => Self::SessionStart,
            "sessionEnd" => Self::SessionEnd,
            "errorOccurred" => Self::ErrorOccurred,
            _ => Self::Other(s),
        }
    }
}

impl From<HookType> for String {
    fn from(t: HookType) -> Self {
        t.as_str().to_string()
    }
}

/// Params of the server-initiated `hooks.invoke`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInvocation {
    pub session_id: String,
    pub hook_type: HookType,
    #[serde(default)]
    pub input: Value,
}

/// Params of the server-initiated `userInput.request`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequest {
    pub session_id: String,
    pub question: String,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub allow_freeform: Option<bool>,
}

/// Answer to a [`UserInputRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputResponse {
    pub answer: String,
    pub was_freeform: bool,
}
