use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::pacing::PacingConfig;

// ============================================================================
// Response Mode
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ResponseType {
    Streaming,
    Text,
}

// ============================================================================
// State Sink Actions
// ============================================================================

/// Notifications delivered to the UI state store while a response is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum AssistantAction {
    UpdateResponseType(ResponseType),
    #[serde(rename_all = "camelCase")]
    AppendMessage {
        message_id: String,
        content: String,
    },
    Patch(Value),
    UpdateOutputMessage(Value),
    Error(String),
    LlmRespondingChange(bool),
}

// ============================================================================
// Wire Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub input: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

// ============================================================================
// Assistant Settings
// ============================================================================

/// Client-side settings, handed explicitly to whatever needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantSettings {
    /// Ask the server for a framed event stream instead of a single JSON reply.
    pub incremental_output: bool,
    pub pacing: PacingConfig,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            incremental_output: true,
            pacing: PacingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_response_type_strings() {
        assert_eq!(ResponseType::Streaming.to_string(), "STREAMING");
        assert_eq!(ResponseType::from_str("TEXT").unwrap(), ResponseType::Text);
        assert_eq!(
            serde_json::to_value(ResponseType::Streaming).unwrap(),
            serde_json::json!("STREAMING")
        );
    }

    #[test]
    fn test_action_serialization() {
        let action = AssistantAction::AppendMessage {
            message_id: "m1".into(),
            content: "hi".into(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "appendMessage");
        assert_eq!(value["payload"]["messageId"], "m1");

        let responding = serde_json::to_value(AssistantAction::LlmRespondingChange(false)).unwrap();
        assert_eq!(responding, serde_json::json!({"type": "llmRespondingChange", "payload": false}));
    }
}
