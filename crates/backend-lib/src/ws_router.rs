// ============================
// photobooth-backend/src/ws_router.rs
// ============================
//! Router and WebSocket connection handling.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use photobooth_common::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::error::AppError;
use crate::http;
use crate::validation;
use crate::websocket::RelayHandler;
use crate::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(&state.settings.uploads_dir);
    let public = ServeDir::new(&state.settings.public_dir);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health_handler))
        .route("/upload_photos", post(http::upload_photos_handler))
        .route("/api/viewer/{id}", get(http::viewer_handler))
        .route("/visualizador/{id}", get(http::visualizador_handler))
        .nest_service("/uploads", uploads)
        .fallback_service(public)
        .layer(DefaultBodyLimit::max(state.settings.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message = state.settings.max_body_bytes;
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

/// Parse and validate one text frame
pub fn parse_client_message(text: &str) -> Result<ClientMessage, AppError> {
    let msg: ClientMessage = serde_json::from_str(text)?;
    validation::validate_client_message(&msg).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    Ok(msg)
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    counter!(crate::metrics::WS_CONNECTION).increment(1);
    gauge!(crate::metrics::WS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut handler = RelayHandler::new(state, tx);
    tracing::info!("Connection {} opened", handler.id());

    // Writer: serialize queued events onto the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize outbound event: {}", e);
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", handler.id(), e);
                break;
            },
        };
        match message {
            Message::Text(text) => match parse_client_message(text.as_str()) {
                Ok(msg) => handler.handle_message(msg),
                Err(e) => {
                    counter!(crate::metrics::WS_DROPPED_EVENT).increment(1);
                    tracing::warn!("Dropping event from {}: {}", handler.id(), e);
                },
            },
            Message::Close(_) => break,
            // ping/pong is answered by axum; binary frames are not part of the protocol
            _ => {},
        }
    }

    handler.disconnect();
    tracing::info!("Connection {} closed", handler.id());

    gauge!(crate::metrics::WS_ACTIVE).decrement(1.0);
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::FlatFileStorage;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state() -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            uploads_dir: temp_dir.path().to_path_buf(),
            public_dir: temp_dir.path().join("public"),
            ..Settings::default()
        };
        let storage = Arc::new(FlatFileStorage::new(temp_dir.path()).unwrap());
        (Arc::new(AppState::new(settings, storage).unwrap()), temp_dir)
    }

    #[test]
    fn test_parse_client_message() {
        assert!(matches!(
            parse_client_message(r#"{"event":"ping"}"#),
            Ok(ClientMessage::Ping)
        ));
        assert!(matches!(
            parse_client_message("not json"),
            Err(AppError::Json(_))
        ));
        assert!(matches!(
            parse_client_message(r#"{"event":"stream_frame","data":{"frame":"hello"}}"#),
            Err(AppError::InvalidInput(_))
        ));
        assert!(parse_client_message(r#"{"event":"unknown_event","data":{}}"#).is_err());
    }

    #[test]
    fn test_parse_accepts_opaque_sessions_and_bare_clips() {
        assert!(matches!(
            parse_client_message(r#"{"event":"join_session","data":{"session":"Cabine 1","role":"operator"}}"#),
            Ok(ClientMessage::JoinSession { session: Some(s), .. }) if s == "Cabine 1"
        ));
        assert!(parse_client_message(r#"{"event":"reset_session","data":{"session":"booth.1"}}"#).is_ok());
        assert!(matches!(
            parse_client_message(r#"{"event":"join_session","data":{"session":"a\u0000b","role":"phone"}}"#),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_client_message(r#"{"event":"boomerang_ready","data":{"clip":"GkXfo59ChoEB"}}"#),
            Ok(ClientMessage::BoomerangReady { clip, .. }) if clip == "GkXfo59ChoEB"
        ));
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _temp_dir) = state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: photobooth_common::HealthResponse = serde_json::from_slice(&body).unwrap();
        assert!(health.ok);
        assert_eq!(health.viewers, 0);
    }

    #[tokio::test]
    async fn test_unknown_viewer_is_404() {
        let (state, _temp_dir) = state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/viewer/doesnotexist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "VIEWER_001");
    }
}
