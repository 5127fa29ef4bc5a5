//! Wires settings, tracing and a manager together and pushes a short chat
//! stream through the bus.
//!
//! ```text
//! RUN_MODE=development HERALD__PERSISTENCE__BACKEND=memory cargo run --bin herald-demo
//! ```

use std::time::Duration;

use chrono::Utc;
use herald::{
    ChatEvent, ChatEventType, EventFilter, Manager, PublishOptions, Settings, TokenUsage,
    filter_by_session_id,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .init();

    info!("Starting herald demo");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let manager = Manager::from_settings(&settings)?;

    if let Some(max_age) = settings.persistence.max_age() {
        let _retention = manager.spawn_retention(settings.persistence.cleanup_interval(), max_age)?;
        info!("Retention enabled, keeping {}h of events", max_age.as_secs() / 3600);
    }

    let started_at = Utc::now();
    manager.start()?;

    let token = CancellationToken::new();
    let mut all = manager.subscribe_all(token.clone(), vec![EventFilter::Always]);
    let printer = tokio::spawn(async move {
        while let Some(event) = all.recv().await {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                payload = %event.payload,
                "event"
            );
        }
    });

    let session = "demo-session";
    let opts = || {
        PublishOptions::new()
            .with_session_id(session)
            .with_persistence(Duration::from_secs(24 * 3600))
    };

    manager.publish_chat(
        ChatEventType::MessageSent,
        ChatEvent {
            session_id: session.to_string(),
            role: Some("user".to_string()),
            content: "Explain the borrow checker".to_string(),
            ..Default::default()
        },
        opts(),
    );
    manager.publish_chat(
        ChatEventType::StreamStarted,
        ChatEvent {
            session_id: session.to_string(),
            model: Some("demo-model".to_string()),
            ..Default::default()
        },
        opts(),
    );
    for chunk in ["The borrow checker ", "enforces ", "aliasing XOR mutation."] {
        manager.publish_chat(
            ChatEventType::TextChunk,
            ChatEvent {
                session_id: session.to_string(),
                content: chunk.to_string(),
                ..Default::default()
            },
            PublishOptions::new().with_session_id(session),
        );
    }
    manager.publish_chat(
        ChatEventType::Usage,
        ChatEvent {
            session_id: session.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 9,
                total_tokens: 21,
            }),
            ..Default::default()
        },
        opts(),
    );

    manager.success("Response complete", "The assistant finished answering");
    manager.publish_custom(
        "demo.finished",
        json!({ "chunks": 3 }),
        PublishOptions::new(),
    );

    let history = manager
        .chat()
        .history(&[filter_by_session_id(session)]);
    info!("Chat history holds {} events for {}", history.len(), session);

    match manager.events_for_session(session, started_at - chrono::Duration::hours(24), 0) {
        Ok(persisted) => info!("Store holds {} events for {}", persisted.len(), session),
        Err(e) => info!("Skipping persisted query: {}", e),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    info!("Stats: {}", serde_json::to_string(&manager.stats())?);
    manager.shutdown();
    token.cancel();
    printer.await?;

    Ok(())
}
