use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::stream::events::StreamChunk;
use crate::types::AssistantAction;

/// Receiver of state notifications, usually the UI store.
pub trait StateSink: Send + Sync {
    fn dispatch(&self, action: AssistantAction);
}

/// Forwards every action into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AssistantAction>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AssistantAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateSink for ChannelSink {
    fn dispatch(&self, action: AssistantAction) {
        if self.tx.send(action).is_err() {
            log::debug!("state sink receiver dropped");
        }
    }
}

/// Keeps every action in memory, in dispatch order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    actions: Mutex<Vec<AssistantAction>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<AssistantAction> {
        self.actions.lock().clone()
    }
}

impl StateSink for RecordingSink {
    fn dispatch(&self, action: AssistantAction) {
        self.actions.lock().push(action);
    }
}

/// Maps a chunk onto its state action. `metadata` chunks carry the whole
/// response and are handed back to the caller instead.
pub fn dispatch_chunk(sink: &dyn StateSink, chunk: StreamChunk) -> Option<Value> {
    let action = match chunk {
        StreamChunk::AppendMessage(content) | StreamChunk::AppendMessageContent(content) => {
            AssistantAction::AppendMessage {
                message_id: content.message_id,
                content: content.content,
            }
        }
        StreamChunk::Patch(patch) => AssistantAction::Patch(patch),
        StreamChunk::UpdateOutputMessage(message) => AssistantAction::UpdateOutputMessage(message),
        StreamChunk::Error(message) => AssistantAction::Error(message),
        StreamChunk::Metadata(payload) => return Some(payload),
    };
    sink.dispatch(action);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::MessageContent;
    use serde_json::json;

    #[test]
    fn test_dispatch_chunk_mapping() {
        let sink = RecordingSink::new();
        assert!(dispatch_chunk(&sink, StreamChunk::Patch(json!({"a": 1}))).is_none());
        assert!(
            dispatch_chunk(
                &sink,
                StreamChunk::AppendMessageContent(MessageContent::new("m1", "x"))
            )
            .is_none()
        );
        assert_eq!(
            sink.actions(),
            vec![
                AssistantAction::Patch(json!({"a": 1})),
                AssistantAction::AppendMessage {
                    message_id: "m1".into(),
                    content: "x".into(),
                },
            ]
        );
    }

    #[test]
    fn test_metadata_is_returned_not_dispatched() {
        let sink = RecordingSink::new();
        let payload = json!({"messages": [], "interactions": []});
        assert_eq!(
            dispatch_chunk(&sink, StreamChunk::Metadata(payload.clone())),
            Some(payload)
        );
        assert!(sink.actions().is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.dispatch(AssistantAction::LlmRespondingChange(false));
        assert_eq!(rx.recv().await, Some(AssistantAction::LlmRespondingChange(false)));

        drop(rx);
        sink.dispatch(AssistantAction::Error("ignored".into()));
    }
}
