use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::init::AppState;
use crate::stream::StreamChunk;
use crate::types::SendMessageRequest;

pub const SEND_MESSAGE_PATH: &str = "/api/assistant/send_message";

pub fn create_app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(SEND_MESSAGE_PATH, post(send_message_handler))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// SEND MESSAGE
// ============================================================================

/// POST /api/assistant/send_message
///
/// With `stream: true` the reply is a `text/event-stream` of framed chunks,
/// otherwise a single JSON document with the whole conversation.
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response> {
    if request.input.trim().is_empty() {
        return Err(AppError::validation("input must not be empty"));
    }

    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let interaction = state.chat_agent.respond(&conversation_id, &request.input);

    let history = state
        .conversations
        .update(conversation_id.clone(), |history| history.push(interaction.clone()));
    log::info!(
        "conversation {}: interaction {} (stream: {})",
        conversation_id,
        interaction.interaction_id,
        request.stream
    );

    if !request.stream {
        let reply = state.chat_agent.buffered_reply(&conversation_id, &history);
        return Ok(Json(reply).into_response());
    }

    let events = state
        .chat_agent
        .stream_reply(interaction)
        .map(|chunk| Ok::<_, Infallible>(sse_event(&chunk)));

    Ok(Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response())
}

fn sse_event(chunk: &StreamChunk) -> Event {
    Event::default()
        .event(chunk.event_name())
        .data(chunk.data().to_string())
}
