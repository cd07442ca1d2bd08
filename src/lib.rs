pub mod agents;
pub mod cache;
pub mod client;
pub mod error;
pub mod handlers;
pub mod init;
pub mod sink;
pub mod stream;
pub mod types;

pub use crate::client::AssistantClient;
pub use crate::init::{AppState, Config};
pub use crate::sink::{ChannelSink, RecordingSink, StateSink};
pub use crate::stream::{AssistantResponse, CancellationToken, ResponseBody, ResponseConsumer, StreamChunk};
pub use crate::types::{AssistantAction, AssistantSettings, ResponseType};
