use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};

mod catalog;
mod config;
mod llm;
mod pipeline;
mod server;
mod state;
mod storage;
mod utils;

use catalog::Catalog;
use config::CONFIG;
use llm::{GeminiImageClient, OpenAiClient};
use pipeline::{MergePipeline, PipelineSettings};
use state::{AppState, ServerSettings};
use storage::{FsSessionStore, JsonFileActivityLog};
use utils::logging::init_logging;

type MainResult = Result<(), Box<dyn Error + Send + Sync>>;

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory '{}'", path.display()))
}

async fn bootstrap_directories() -> anyhow::Result<()> {
    ensure_dir(&CONFIG.uploads_dir).await?;
    ensure_dir(&CONFIG.static_dir).await?;
    if let Some(parent) = CONFIG.activity_log_path.parent() {
        ensure_dir(parent).await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> MainResult {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_dir, &CONFIG.log_level);
    CONFIG.warn_missing_settings();

    bootstrap_directories().await?;

    let catalog = Arc::new(Catalog::load(
        CONFIG.catalog_config_path.as_deref(),
        &CONFIG.default_style,
        &CONFIG.default_model,
    ));
    info!(
        "Catalog ready: {} style(s), {} model(s), default style '{}', default model '{}'",
        catalog.styles().len(),
        catalog.models().len(),
        catalog.default_style().key,
        catalog.default_model().key
    );

    let openai = Arc::new(OpenAiClient::from_config(&CONFIG));
    let gemini = Arc::new(GeminiImageClient::from_config(&CONFIG));
    let sessions = Arc::new(FsSessionStore::new(&CONFIG.uploads_dir));
    let activity_log = Arc::new(JsonFileActivityLog::new(
        &CONFIG.activity_log_path,
        CONFIG.activity_log_max_entries,
    ));
    info!(
        "Sessions stored under '{}', activity log at '{}'",
        sessions.root().display(),
        CONFIG.activity_log_path.display()
    );

    let pipeline = MergePipeline::new(
        catalog,
        openai.clone(),
        openai.clone(),
        openai,
        gemini,
        sessions.clone(),
        activity_log.clone(),
        PipelineSettings::from_config(&CONFIG),
    );
    let state = AppState::new(
        pipeline,
        sessions,
        activity_log,
        ServerSettings::from_config(&CONFIG),
    );
    let app = server::build_router(state);

    let addr: SocketAddr = format!("{}:{}", CONFIG.host, CONFIG.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", CONFIG.host, CONFIG.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Image merge server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}
