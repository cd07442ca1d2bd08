use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use crate::error::{AppError, ErrorContext, Result};
use crate::handlers::SEND_MESSAGE_PATH;
use crate::sink::StateSink;
use crate::stream::{AssistantResponse, ResponseBody, ResponseConsumer, StreamError};
use crate::types::{AssistantAction, AssistantSettings, SendMessageRequest};

const EVENT_STREAM: &str = "text/event-stream";

/// Talks to the assistant server on behalf of the UI.
#[derive(Debug, Clone)]
pub struct AssistantClient {
    http: reqwest::Client,
    base_url: String,
    settings: AssistantSettings,
}

impl AssistantClient {
    pub fn new(base_url: impl Into<String>, settings: AssistantSettings) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, settings)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
        }
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub async fn send_message(
        &self,
        input: &str,
        conversation_id: Option<&str>,
    ) -> Result<AssistantResponse> {
        let request = SendMessageRequest {
            input: input.to_string(),
            stream: self.settings.incremental_output,
            conversation_id: conversation_id.map(str::to_string),
        };
        let accept = if request.stream { EVENT_STREAM } else { "application/json" };

        let response = self
            .http
            .post(format!("{}{}", self.base_url, SEND_MESSAGE_PATH))
            .header(ACCEPT, accept)
            .json(&request)
            .send()
            .await
            .context("sending message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(format!(
                "assistant server returned {}: {}",
                status, body
            )));
        }

        Ok(AssistantResponse::new(response_body(response).await?))
    }

    /// Sends a message and consumes the reply into `sink`, returning the
    /// `metadata` payloads. The responding flag is raised before the request
    /// and always cleared afterwards, also when the request itself fails.
    pub async fn ask(
        &self,
        input: &str,
        conversation_id: Option<&str>,
        sink: Arc<dyn StateSink>,
    ) -> Result<Vec<Value>> {
        sink.dispatch(AssistantAction::LlmRespondingChange(true));
        match self.send_message(input, conversation_id).await {
            Ok(response) => {
                let consumer = ResponseConsumer::new(self.settings, sink);
                Ok(consumer.consume_into_sink(response).await)
            }
            Err(err) => {
                sink.dispatch(AssistantAction::Error(err.message.clone()));
                sink.dispatch(AssistantAction::LlmRespondingChange(false));
                Err(err)
            }
        }
    }
}

/// Classifies a reply by its content type: event streams stay streamed,
/// anything else is read whole as JSON.
pub async fn response_body(response: reqwest::Response) -> Result<ResponseBody> {
    let streamed = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(EVENT_STREAM));

    if streamed {
        let source = response
            .bytes_stream()
            .map(|read| read.map_err(|e| StreamError::Read(e.to_string())));
        Ok(ResponseBody::Streamed(Box::pin(source)))
    } else {
        let value: Value = response.json().await.context("decoding reply")?;
        Ok(ResponseBody::Buffered(value))
    }
}
