use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use assistant_stream::handlers::{create_app_router, SEND_MESSAGE_PATH};
use assistant_stream::init::{app_init, Config};
use assistant_stream::{AssistantAction, AssistantClient, ChannelSink};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let state = app_init(&config)?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state.clone());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("📡 Assistant: http://{}{}", addr, SEND_MESSAGE_PATH);
    log::info!("❤️  Health: http://{}/health", addr);
    log::info!("💾 Conversation cache: {} entries", config.cache.capacity);
    log::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = state.conversations.save() {
        assistant_stream::error::log_error(&e);
    }
    log::info!("👋 Server stopped");

    Ok(())
}

/// Sends one message and prints the paced reply as it arrives.
async fn ask(config: Config, input: String) -> Result<(), Box<dyn Error>> {
    let client = AssistantClient::new(config.assistant_url.clone(), config.settings);
    let (sink, mut actions) = ChannelSink::new();

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(action) = actions.recv().await {
            match action {
                AssistantAction::AppendMessage { content, .. } => {
                    print!("{}", content);
                    let _ = stdout.flush();
                }
                AssistantAction::Error(message) => eprintln!("\n❌ {}", message),
                other => log::debug!("{:?}", other),
            }
        }
        println!();
    });

    let result = client.ask(&input, None, Arc::new(sink)).await;
    printer.await?;

    for payload in result? {
        let messages = payload["messages"].as_array().cloned().unwrap_or_default();
        if let Some(reply) = messages.iter().rev().find(|m| m["type"] == "output") {
            println!("{}", reply["content"].as_str().unwrap_or_default());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();
    let config = Config::from_env()?;
    log::debug!("✅ Configuration loaded");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        Some((command, rest)) if command == "ask" => ask(config, rest.join(" ")).await,
        _ => {
            log::info!("🚀 Starting assistant server...");
            serve(config).await
        }
    }
}
