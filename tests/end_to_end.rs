use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use assistant_stream::agents::ChatAgent;
use assistant_stream::cache::NamespacedCache;
use assistant_stream::handlers::create_app_router;
use assistant_stream::init::CONVERSATION_CACHE_NAMESPACE;
use assistant_stream::stream::PacingConfig;
use assistant_stream::{
    AppState, AssistantAction, AssistantClient, AssistantSettings, RecordingSink, ResponseType,
};

async fn spawn_server() -> (String, Arc<AppState>) {
    let state = Arc::new(AppState {
        chat_agent: ChatAgent::new(3, Duration::ZERO),
        conversations: NamespacedCache::new(
            CONVERSATION_CACHE_NAMESPACE,
            NonZeroUsize::new(10).unwrap(),
        ),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn settings(incremental_output: bool) -> AssistantSettings {
    AssistantSettings {
        incremental_output,
        pacing: PacingConfig {
            tick_interval: Duration::from_millis(5),
            slice_len: 4,
        },
    }
}

#[tokio::test]
async fn test_streamed_reply_is_paced_into_sink() {
    let (url, state) = spawn_server().await;
    let client = AssistantClient::new(url, settings(true));
    let sink = Arc::new(RecordingSink::new());

    let metadata = client.ask("hello there", Some("c1"), sink.clone()).await.unwrap();
    assert!(metadata.is_empty());

    let actions = sink.actions();
    assert_eq!(actions.first(), Some(&AssistantAction::LlmRespondingChange(true)));
    assert_eq!(
        actions.get(1),
        Some(&AssistantAction::UpdateResponseType(ResponseType::Streaming))
    );

    let text: String = actions
        .iter()
        .filter_map(|action| match action {
            AssistantAction::AppendMessage { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "You said: hello there");
    assert!(
        actions
            .iter()
            .any(|action| matches!(action, AssistantAction::UpdateOutputMessage(_)))
    );

    let tail = &actions[actions.len() - 2..];
    assert_eq!(
        tail,
        &[
            AssistantAction::LlmRespondingChange(false),
            AssistantAction::UpdateResponseType(ResponseType::Text),
        ]
    );
    assert_eq!(state.conversations.get("c1").map(|h| h.len()), Some(1));
}

#[tokio::test]
async fn test_buffered_reply_returns_metadata() {
    let (url, _state) = spawn_server().await;
    let client = AssistantClient::new(url, settings(false));
    let sink = Arc::new(RecordingSink::new());

    client.ask("first", Some("c2"), sink.clone()).await.unwrap();
    let metadata = client.ask("second", Some("c2"), sink.clone()).await.unwrap();

    assert_eq!(metadata.len(), 1);
    let messages = metadata[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3]["content"], "You said: second");

    let actions = sink.actions();
    assert!(actions.contains(&AssistantAction::UpdateResponseType(ResponseType::Text)));
    assert!(!actions.contains(&AssistantAction::UpdateResponseType(ResponseType::Streaming)));
    assert_eq!(actions.last(), Some(&AssistantAction::LlmRespondingChange(false)));
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let (url, _state) = spawn_server().await;
    let client = AssistantClient::new(url, settings(true));
    let sink = Arc::new(RecordingSink::new());

    let err = client.ask("   ", None, sink.clone()).await.unwrap_err();
    assert!(err.message.contains("422"));

    let actions = sink.actions();
    assert!(matches!(actions.get(1), Some(AssistantAction::Error(_))));
    assert_eq!(actions.last(), Some(&AssistantAction::LlmRespondingChange(false)));
}

#[tokio::test]
async fn test_health() {
    let (url, _state) = spawn_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_concurrent_messages_keep_full_history() {
    let (url, state) = spawn_server().await;
    let client = AssistantClient::new(url, settings(false));

    let requests = (0..10).map(|n| {
        let client = client.clone();
        tokio::spawn(async move {
            let sink = Arc::new(RecordingSink::new());
            client.ask(&format!("message {}", n), Some("shared"), sink).await
        })
    });
    for request in futures::future::join_all(requests).await {
        request.unwrap().unwrap();
    }

    assert_eq!(state.conversations.get("shared").map(|h| h.len()), Some(10));
}
