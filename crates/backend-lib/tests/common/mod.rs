// ============================
// tests/common/mod.rs
// ============================
//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use photobooth_backend::{config::Settings, storage::FlatFileStorage, ws_router, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// 1x1 JPEG-ish payload; only the bytes matter
pub const JPEG_B64: &str = "/9j/4AAQSkZJRgABAQAAAQABAAD/2wBDAAgGBgcGBQgHBwcJCQgKDA==";

pub fn jpeg_data_url() -> String {
    format!("data:image/jpeg;base64,{JPEG_B64}")
}

/// Settings rooted in a temp dir, with no image host key
pub fn test_settings(temp_dir: &TempDir) -> Settings {
    Settings {
        uploads_dir: temp_dir.path().join("uploads"),
        public_dir: temp_dir.path().join("public"),
        ..Settings::default()
    }
}

/// Build the shared state for `settings`
pub fn build_state(settings: Settings) -> Arc<AppState> {
    let storage = Arc::new(FlatFileStorage::new(&settings.uploads_dir).unwrap());
    Arc::new(AppState::new(settings, storage).unwrap())
}

/// Set up a test environment backed by a temp dir
pub fn setup_test_env() -> (Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let state = build_state(test_settings(&temp_dir));
    (state, temp_dir)
}

/// Serve the full router on an ephemeral port; `base_url` points at it
pub async fn spawn_server(temp_dir: &TempDir) -> (Arc<AppState>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let settings = Settings {
        base_url: Some(format!("http://{addr}")),
        ..test_settings(temp_dir)
    };
    let state = build_state(settings);
    let app = ws_router::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, addr)
}
