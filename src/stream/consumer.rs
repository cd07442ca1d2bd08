//! Response consumption.
//!
//! Turns one assistant response into a single ordered stream of chunks while
//! keeping the state sink informed of the response mode and of the end of the
//! response. Message text never goes to the output directly: it is routed
//! through the content pool and comes back out as paced `appendMessage`
//! chunks.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::sink::{dispatch_chunk, StateSink};
use crate::stream::cancel::CancellationToken;
use crate::stream::codec::FrameCodec;
use crate::stream::events::{MessageContent, StreamChunk};
use crate::stream::pacing::{MessageContentPool, PacingConfig, PoolOutput, PooledContent};
use crate::stream::reader::{self, ByteSource, ConvertedStream, StreamError};
use crate::types::{AssistantAction, AssistantSettings, ResponseType};

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

pub enum ResponseBody {
    Streamed(ByteSource),
    Buffered(Value),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streamed(_) => f.write_str("Streamed(..)"),
            Self::Buffered(value) => f.debug_tuple("Buffered").field(value).finish(),
        }
    }
}

#[derive(Debug)]
pub struct AssistantResponse {
    pub body: ResponseBody,
    pub abort: CancellationToken,
}

impl AssistantResponse {
    pub fn new(body: ResponseBody) -> Self {
        Self {
            body,
            abort: CancellationToken::new(),
        }
    }

    pub fn streamed(source: ByteSource) -> Self {
        Self::new(ResponseBody::Streamed(source))
    }

    pub fn buffered(value: Value) -> Self {
        Self::new(ResponseBody::Buffered(value))
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }
}

// ============================================================================
// RESPONSE CONSUMER
// ============================================================================

pub struct ResponseConsumer {
    settings: AssistantSettings,
    sink: Arc<dyn StateSink>,
}

impl ResponseConsumer {
    pub fn new(settings: AssistantSettings, sink: Arc<dyn StateSink>) -> Self {
        Self { settings, sink }
    }

    pub fn consume(&self, response: AssistantResponse) -> ChunkStream {
        let sink = self.sink.clone();
        let pacing = self.settings.pacing;
        match response.body {
            ResponseBody::Streamed(source) => {
                Box::pin(consume_streamed(source, response.abort, pacing, sink))
            }
            ResponseBody::Buffered(value) => Box::pin(consume_buffered(value, pacing, sink)),
        }
    }

    /// Drives a response to completion, dispatching every chunk to the sink.
    /// Returns the `metadata` payloads, which belong to the caller.
    pub async fn consume_into_sink(&self, response: AssistantResponse) -> Vec<Value> {
        let mut output = self.consume(response);
        let mut metadata = Vec::new();
        while let Some(chunk) = output.next().await {
            if let Some(payload) = dispatch_chunk(self.sink.as_ref(), chunk) {
                metadata.push(payload);
            }
        }
        metadata
    }
}

enum Step {
    Abort,
    Text(Option<Result<String, StreamError>>),
    Paced(Option<PooledContent>),
}

fn paced_chunk(content: PooledContent) -> StreamChunk {
    StreamChunk::AppendMessage(MessageContent::new(
        content.message_id,
        content.message_content,
    ))
}

fn start_pool(pacing: PacingConfig) -> (MessageContentPool, PoolOutput) {
    let mut pool = MessageContentPool::new(pacing);
    let output = pool
        .take_output()
        .unwrap_or_else(|| -> PoolOutput { Box::pin(futures::stream::empty()) });
    pool.start();
    (pool, output)
}

fn finish(sink: &dyn StateSink, mode: ResponseType) {
    sink.dispatch(AssistantAction::LlmRespondingChange(false));
    if mode == ResponseType::Streaming {
        sink.dispatch(AssistantAction::UpdateResponseType(ResponseType::Text));
    }
}

fn consume_streamed(
    source: ByteSource,
    abort: CancellationToken,
    pacing: PacingConfig,
    sink: Arc<dyn StateSink>,
) -> impl Stream<Item = StreamChunk> + Send {
    async_stream::stream! {
        sink.dispatch(AssistantAction::UpdateResponseType(ResponseType::Streaming));

        let ConvertedStream { output: mut text, cancel } = reader::convert(source);
        let mut codec = FrameCodec::new();
        let (mut pool, mut paced) = start_pool(pacing);
        let mut input_open = true;
        let mut aborted = false;

        loop {
            let step = tokio::select! {
                biased;
                _ = abort.cancelled(), if !aborted => Step::Abort,
                next = text.next(), if input_open => Step::Text(next),
                next = paced.next() => Step::Paced(next),
            };

            match step {
                Step::Abort => {
                    log::info!("response aborted, draining buffered content");
                    aborted = true;
                    cancel.cancel();
                    pool.input_complete();
                }
                Step::Text(Some(Ok(fragment))) => {
                    for decoded in codec.decode(&fragment) {
                        match decoded.chunk {
                            StreamChunk::AppendMessageContent(content)
                            | StreamChunk::AppendMessage(content) => {
                                pool.add_message_content(&content.message_id, &content.content);
                            }
                            chunk => {
                                yield chunk;
                            }
                        }
                    }
                }
                Step::Text(Some(Err(err))) => {
                    log::error!("response stream failed: {}", err);
                    // Slices already queued by the pacing job are discarded too.
                    pool.stop();
                    drop(paced);
                    yield StreamChunk::Error(err.to_string());
                    break;
                }
                Step::Text(None) => {
                    log::debug!("response stream finished");
                    let pending = codec.pending();
                    if !pending.is_empty() {
                        log::warn!(
                            "response stream closed inside a frame, discarding {} bytes: {:?}",
                            pending.len(),
                            pending
                        );
                    }
                    input_open = false;
                    pool.input_complete();
                }
                Step::Paced(Some(content)) => {
                    yield paced_chunk(content);
                }
                Step::Paced(None) => break,
            }
        }

        finish(sink.as_ref(), ResponseType::Streaming);
    }
}

fn consume_buffered(
    value: Value,
    pacing: PacingConfig,
    sink: Arc<dyn StateSink>,
) -> impl Stream<Item = StreamChunk> + Send {
    async_stream::stream! {
        sink.dispatch(AssistantAction::UpdateResponseType(ResponseType::Text));

        let (pool, mut paced) = start_pool(pacing);
        yield StreamChunk::Metadata(value);

        // Resumed only once the consumer has taken the metadata chunk.
        pool.input_complete();
        while let Some(content) = paced.next().await {
            yield paced_chunk(content);
        }

        finish(sink.as_ref(), ResponseType::Text);
    }
}
