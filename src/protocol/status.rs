//! Handshake, status, auth and model listing types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version this SDK speaks. `ping` must report the same.
pub const SDK_PROTOCOL_VERSION: u32 = 2;

/// Result of `ping`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub protocol_version: Option<u32>,
}

/// Result of `status.get`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: u32,
}

/// Result of `auth.getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// A model offered by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Capabilities, policy and billing details as reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListModelsResult {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_without_version() {
        let ping: PingResponse =
            serde_json::from_value(serde_json::json!({"message": "pong"})).unwrap();
        assert_eq!(ping.protocol_version, None);
    }

    #[test]
    fn test_model_keeps_capabilities() {
        let model: ModelInfo = serde_json::from_value(serde_json::json!({
            "id": "claude-sonnet-4.5",
            "name": "Claude Sonnet 4.5",
            "capabilities": {"supports": {"vision": true}}
        }))
        .unwrap();
        assert_eq!(model.id, "claude-sonnet-4.5");
        assert_eq!(model.extra["capabilities"]["supports"]["vision"], true);
    }
}
