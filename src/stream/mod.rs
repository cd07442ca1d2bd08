// Public module exports
pub mod cancel;
pub mod codec;
pub mod consumer;
pub mod events;
pub mod pacing;
pub mod reader;

// Re-export main types for convenience
pub use cancel::CancellationToken;
pub use codec::{deserialize, serialize, EventFrame, FrameCodec, FrameError, FrameParser};
pub use consumer::{AssistantResponse, ChunkStream, ResponseBody, ResponseConsumer};
pub use events::{DecodedChunk, MessageContent, StreamChunk};
pub use pacing::{MessageContentPool, PacingConfig, PoolStatus, PooledContent};
pub use reader::{convert, ByteSource, ConvertedStream, StreamError, TextStream};
