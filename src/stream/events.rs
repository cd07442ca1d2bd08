use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Text addressed to one message, carried by both append events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub message_id: String,
    pub content: String,
}

impl MessageContent {
    pub fn new(message_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum StreamChunk {
    // Incremental text for an existing message
    AppendMessageContent(MessageContent),

    // Text that starts (or extends) a message
    AppendMessage(MessageContent),

    // Full replacement of an output message
    UpdateOutputMessage(Value),

    // Partial state patch
    Patch(Value),

    // Whole response payload, only produced for buffered responses
    Metadata(Value),

    Error(String),
}

impl StreamChunk {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AppendMessageContent(_) => "appendMessageContent",
            Self::AppendMessage(_) => "appendMessage",
            Self::UpdateOutputMessage(_) => "updateOutputMessage",
            Self::Patch(_) => "patch",
            Self::Metadata(_) => "metadata",
            Self::Error(_) => "error",
        }
    }

    /// The `data` half of the chunk as a JSON value.
    pub fn data(&self) -> Value {
        match self {
            Self::AppendMessageContent(content) | Self::AppendMessage(content) => json!({
                "messageId": content.message_id,
                "content": content.content,
            }),
            Self::UpdateOutputMessage(value) | Self::Patch(value) | Self::Metadata(value) => {
                value.clone()
            }
            Self::Error(message) => Value::String(message.clone()),
        }
    }

    /// Rebuilds a chunk from an event name and its parsed `data`.
    pub fn from_parts(event: &str, data: Value) -> serde_json::Result<Self> {
        serde_json::from_value(json!({ "event": event, "data": data }))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A chunk together with the `id:` field of the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub chunk: StreamChunk,
    pub id: Option<String>,
}

impl DecodedChunk {
    pub fn new(chunk: StreamChunk) -> Self {
        Self { chunk, id: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_representation() {
        let chunk = StreamChunk::AppendMessageContent(MessageContent::new("m1", "hi"));
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["event"], "appendMessageContent");
        assert_eq!(value["data"]["messageId"], "m1");
        assert_eq!(value["data"], chunk.data());
    }

    #[test]
    fn test_from_parts() {
        let chunk = StreamChunk::from_parts("error", json!("boom")).unwrap();
        assert_eq!(chunk, StreamChunk::Error("boom".to_string()));

        let patch = StreamChunk::from_parts("patch", json!({"title": "x"})).unwrap();
        assert_eq!(patch.event_name(), "patch");
    }

    #[test]
    fn test_from_parts_rejects_unknown_event() {
        let err = StreamChunk::from_parts("message", json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }
}
