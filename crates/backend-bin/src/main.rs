// ============================
// photobooth-backend-bin/src/main.rs
// ============================
//! Tokio / Axum entry-point for the photobooth relay.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use photobooth_backend::{
    config::{Settings, DEFAULT_CONFIG_FILE},
    storage::FlatFileStorage,
    viewers, ws_router, AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; skipped when missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Listen port, overrides config and environment
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)?;
    if let Some(port) = args.port {
        settings.port = port;
        settings.validate()?;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage = FlatFileStorage::new(&settings.uploads_dir)
        .with_context(|| format!("cannot prepare {}", settings.uploads_dir.display()))?;
    let state = Arc::new(AppState::new(settings, Arc::new(storage))?);

    let restored = state.restore_viewers().await?;
    if restored > 0 {
        tracing::info!("Restored {} viewer records", restored);
    }
    if !state.uploads.remote_enabled() {
        tracing::warn!("No image host key configured, uploads are stored locally");
    }
    let _sweeper = viewers::spawn_sweeper(state.clone());

    let addr = state.settings.bind_addr()?;
    let app = ws_router::create_router(state.clone());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!("listening on {}", addr);
    tracing::info!("public origin {}", state.settings.public_origin());

    axum::serve(listener, app).await?;

    Ok(())
}
