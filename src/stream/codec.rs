//! Textual event framing.
//!
//! A frame is an optional `event:` line, one or more `data:` lines holding JSON
//! and an optional `id:` line, terminated by a blank line:
//!
//! ```text
//! event: appendMessageContent
//! data: {"messageId":"m1","content":"Hello"}
//!
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::stream::events::{DecodedChunk, StreamChunk};

pub const FRAME_TERMINATOR: &str = "\n\n";
pub const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no data field")]
    MissingData,

    #[error("frame data is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unsupported event `{event}`: {source}")]
    UnsupportedEvent {
        event: String,
        source: serde_json::Error,
    },
}

/// One frame as it appeared on the wire, `data` still unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl EventFrame {
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT)
    }
}

// ============================================================================
// Serialization
// ============================================================================

pub fn serialize_frame(event: Option<&str>, data: &Value) -> String {
    let mut frame = String::new();
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    frame.push_str("data: ");
    frame.push_str(&data.to_string());
    frame.push_str(FRAME_TERMINATOR);
    frame
}

pub fn serialize(chunk: &StreamChunk) -> String {
    serialize_frame(Some(chunk.event_name()), &chunk.data())
}

/// Decodes a self-contained piece of text with a fresh parser.
pub fn deserialize(text: &str) -> Vec<DecodedChunk> {
    FrameCodec::new().decode(text)
}

// ============================================================================
// Incremental parser
// ============================================================================

/// Buffers text across calls and yields frames once their terminator arrives.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
    // Last fed text ended in `\r`; a leading `\n` of the next call belongs to it.
    trailing_cr: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` and returns every frame completed by it. Blocks that
    /// hold only comments (keep-alives) produce nothing.
    pub fn feed(&mut self, text: &str) -> Vec<Result<EventFrame, FrameError>> {
        self.push_normalized(text);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find(FRAME_TERMINATOR) {
            let block: String = self.buffer.drain(..end + FRAME_TERMINATOR.len()).collect();
            if let Some(frame) = parse_block(&block[..end]).transpose() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Text received so far that does not yet form a complete frame.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.trailing_cr = false;
    }

    /// `\r\n`, `\r` and `\n` all end a line. Only the new text is scanned.
    fn push_normalized(&mut self, text: &str) {
        self.buffer.reserve(text.len());
        for c in text.chars() {
            match c {
                '\r' => {
                    self.buffer.push('\n');
                    self.trailing_cr = true;
                }
                '\n' if self.trailing_cr => self.trailing_cr = false,
                c => {
                    self.buffer.push(c);
                    self.trailing_cr = false;
                }
            }
        }
    }
}

fn parse_block(block: &str) -> Result<Option<EventFrame>, FrameError> {
    let mut event = None;
    let mut data: Option<String> = None;
    let mut id = None;
    let mut has_fields = false;

    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::Malformed(format!("line without field name: {:?}", line)))?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        has_fields = true;

        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            "id" => id = Some(value.to_string()),
            "retry" => {}
            other => log::debug!("ignoring frame field `{}`", other),
        }
    }

    if !has_fields {
        return Ok(None);
    }
    let data = data.ok_or(FrameError::MissingData)?;
    Ok(Some(EventFrame { event, data, id }))
}

// ============================================================================
// Codec
// ============================================================================

/// Turns streamed text into chunks. A frame that cannot be decoded becomes a
/// single `error` chunk and decoding carries on with the next frame.
#[derive(Debug, Default)]
pub struct FrameCodec {
    parser: FrameParser,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, text: &str) -> Vec<DecodedChunk> {
        self.parser
            .feed(text)
            .into_iter()
            .map(|frame| match frame.and_then(decode_frame) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::warn!("failed to decode frame: {}", err);
                    DecodedChunk::new(StreamChunk::Error(err.to_string()))
                }
            })
            .collect()
    }

    /// Text of a frame that has started but not yet been terminated.
    pub fn pending(&self) -> &str {
        self.parser.pending()
    }

    pub fn reset(&mut self) {
        self.parser.reset();
    }
}

fn decode_frame(frame: EventFrame) -> Result<DecodedChunk, FrameError> {
    let data: Value = serde_json::from_str(&frame.data)?;
    let chunk = StreamChunk::from_parts(frame.event_name(), data).map_err(|source| {
        FrameError::UnsupportedEvent {
            event: frame.event_name().to_string(),
            source,
        }
    })?;
    Ok(DecodedChunk {
        chunk,
        id: frame.id,
    })
}
