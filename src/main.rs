use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hikari_render::{
    config::AppConfig,
    controller::Controller,
    gemini::GeminiClient,
    presets::PresetStore,
    routes::{router, AppState},
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    match &config.api_key {
        Some(key) => tracing::info!("🔑 Using API key: {}...", key.chars().take(6).collect::<String>()),
        None => tracing::warn!("⚠️ No API key set, running in demo mode with placeholder renders"),
    }

    let gemini = GeminiClient::with_base_url(config.api_key.clone(), config.api_base.clone())
        .with_polling(config.video_polling);
    let state = AppState {
        controller: Controller::new(Arc::new(gemini), config.timings),
        presets: Arc::new(PresetStore::open(&config.presets_path)),
        max_upload_bytes: config.max_upload_bytes,
    };

    let app = router(state).layer(
        ServiceBuilder::new().layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("👋 Shutting down");
}
