use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::stream::events::{MessageContent, StreamChunk};

/// One question/answer exchange of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub interaction_id: String,
    pub conversation_id: String,
    pub input: String,
    pub response: String,
    pub create_time: DateTime<Utc>,
}

impl Interaction {
    pub fn input_message(&self) -> Value {
        json!({
            "type": "input",
            "contentType": "text",
            "content": self.input,
        })
    }

    pub fn output_message(&self) -> Value {
        json!({
            "type": "output",
            "contentType": "markdown",
            "messageId": self.interaction_id,
            "interactionId": self.interaction_id,
            "content": self.response,
        })
    }
}

/// Stand-in responder: answers by echoing the input and streams the answer
/// back in small pieces.
#[derive(Debug, Clone)]
pub struct ChatAgent {
    chunk_size: usize,
    chunk_delay: Duration,
}

impl Default for ChatAgent {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(50))
    }
}

impl ChatAgent {
    pub fn new(chunk_size: usize, chunk_delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay,
        }
    }

    pub fn respond(&self, conversation_id: &str, input: &str) -> Interaction {
        Interaction {
            interaction_id: Uuid::now_v7().to_string(),
            conversation_id: conversation_id.to_string(),
            input: input.to_string(),
            response: format!("You said: {}", input.trim()),
            create_time: Utc::now(),
        }
    }

    /// Chunks for a streamed reply: an empty `appendMessage` that creates the
    /// message, its text as `appendMessageContent` pieces, then the final
    /// output message.
    pub fn stream_reply(
        &self,
        interaction: Interaction,
    ) -> impl Stream<Item = StreamChunk> + Send + use<> {
        let chunk_size = self.chunk_size;
        let chunk_delay = self.chunk_delay;
        async_stream::stream! {
            let message_id = interaction.interaction_id.clone();
            yield StreamChunk::AppendMessage(MessageContent::new(message_id.clone(), ""));

            let chars: Vec<char> = interaction.response.chars().collect();
            for piece in chars.chunks(chunk_size) {
                yield StreamChunk::AppendMessageContent(MessageContent::new(
                    message_id.clone(),
                    piece.iter().collect::<String>(),
                ));
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
            }

            yield StreamChunk::UpdateOutputMessage(interaction.output_message());
        }
    }

    /// Whole-conversation payload for a non-streamed reply.
    pub fn buffered_reply(&self, conversation_id: &str, history: &[Interaction]) -> Value {
        let messages: Vec<Value> = history
            .iter()
            .flat_map(|interaction| [interaction.input_message(), interaction.output_message()])
            .collect();
        json!({
            "conversationId": conversation_id,
            "messages": messages,
            "interactions": history,
        })
    }
}
