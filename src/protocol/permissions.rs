//! Permission request/response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind used when the SDK asks permission for a `requires_approval` tool.
pub const CUSTOM_TOOL_KIND: &str = "custom-tool";

/// A request from the runtime (or the SDK itself) for permission to act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// `shell`, `write`, `mcp`, `read`, `url`, `custom-tool`, ...
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Kind-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PermissionRequest {
    pub(crate) fn custom_tool(tool_call_id: &str, tool_name: &str, arguments: &Value) -> Self {
        let mut extra = Map::new();
        extra.insert("toolName".to_string(), Value::String(tool_name.to_string()));
        extra.insert("arguments".to_string(), arguments.clone());
        Self {
            kind: CUSTOM_TOOL_KIND.to_string(),
            tool_call_id: Some(tool_call_id.to_string()),
            extra,
        }
    }
}

/// Decision of a permission handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PermissionOutcome {
    Approved,
    DeniedByRules,
    DeniedNoApprovalRule,
    DeniedInteractivelyByUser,
    Custom(String),
}

impl PermissionOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "approved",
            Self::DeniedByRules => "denied-by-rules",
            Self::DeniedNoApprovalRule => {
                "denied-no-approval-rule-and-could-not-request-from-user"
            }
            Self::DeniedInteractivelyByUser => "denied-interactively-by-user",
            Self::Custom(kind) => kind,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl From<String> for PermissionOutcome {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "approved" => Self::Approved,
            "denied-by-rules" => Self::DeniedByRules,
            "denied-no-approval-rule-and-could-not-request-from-user" => {
                Self::DeniedNoApprovalRule
            }
            "denied-interactively-by-user" => Self::DeniedInteractivelyByUser,
            _ => Self::Custom(kind),
        }
    }
}

impl From<PermissionOutcome> for String {
    fn from(outcome: PermissionOutcome) -> Self {
        outcome.as_str().to_string()
    }
}

/// Params of the server-initiated `permission.request`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestParams {
    pub session_id: String,
    pub permission_request: PermissionRequest,
}

/// `{kind}` as placed under `result` in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResult {
    pub kind: PermissionOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keeps_extra_fields() {
        let req: PermissionRequest = serde_json::from_value(serde_json::json!({
            "kind": "shell",
            "toolCallId": "tc-9",
            "fullCommandText": "rm -rf build"
        }))
        .unwrap();
        assert_eq!(req.kind, "shell");
        assert_eq!(req.tool_call_id.as_deref(), Some("tc-9"));
        assert_eq!(req.extra["fullCommandText"], "rm -rf build");
    }

    #[test]
    fn test_custom_tool_request_shape() {
        let req = PermissionRequest::custom_tool("c1", "deploy", &serde_json::json!({"env": "prod"}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["kind"], "custom-tool");
        assert_eq!(value["toolCallId"], "c1");
        assert_eq!(value["toolName"], "deploy");
        assert_eq!(value["arguments"]["env"], "prod");
    }

    #[test]
    fn test_outcome_strings() {
        let result = PermissionResult {
            kind: PermissionOutcome::DeniedNoApprovalRule,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap()["kind"],
            "denied-no-approval-rule-and-could-not-request-from-user"
        );
        assert_eq!(
            PermissionOutcome::from("something-new".to_string()),
            PermissionOutcome::Custom("something-new".to_string())
        );
    }
}
