// ============================
// tests/http_api.rs
// ============================
//! HTTP routes exercised through the router with `oneshot`.
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{jpeg_data_url, setup_test_env, JPEG_B64};
use photobooth_backend::{ws_router, AppState};
use photobooth_common::{UploadPhotosResponse, ViewerRecord};
use serde_json::json;
use tower::ServiceExt;

fn app(state: &Arc<AppState>) -> Router {
    ws_router::create_router(state.clone())
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn post_photos(app: Router, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload_photos")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

/// Poll until the record's uploads have landed
async fn wait_for_photos(state: &Arc<AppState>, viewer_id: &str, count: usize) -> ViewerRecord {
    for _ in 0..100 {
        if let Some(record) = state.viewers.get(viewer_id) {
            if record.photos.len() == count {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Viewer {viewer_id} never reached {count} photos");
}

#[tokio::test]
async fn test_upload_photos_then_lookup() {
    let (state, _temp_dir) = setup_test_env();

    let (status, body) = post_photos(
        app(&state),
        json!({"session": "s1", "photos": [jpeg_data_url(), jpeg_data_url()]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response: UploadPhotosResponse = serde_json::from_slice(&body).unwrap();
    assert!(response.ok);
    assert_eq!(
        response.visualizador_url,
        format!("http://localhost:3000/visualizador/{}", response.viewer_id)
    );

    let record = wait_for_photos(&state, &response.viewer_id, 2).await;
    assert!(record
        .photos
        .iter()
        .all(|url| url.starts_with("http://localhost:3000/uploads/") && url.ends_with(".jpg")));
    assert!(record.stories_montage.is_none());
    assert!(record.print.is_none());
    assert_eq!(record.session, "s1");

    let uri = format!("/api/viewer/{}", response.viewer_id);
    let (status, _, first) = get(app(&state), &uri).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, second) = get(app(&state), &uri).await;
    assert_eq!(first, second);

    let value: serde_json::Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(value["viewerId"], response.viewer_id.as_str());
    assert!(value["storiesMontage"].is_null());
    assert!(value["print"].is_null());
}

#[tokio::test]
async fn test_upload_photos_rejects_bad_session() {
    let (state, _temp_dir) = setup_test_env();
    let (status, body) = post_photos(app(&state), json!({"session": "line\nbreak", "photos": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["code"], "VAL_001");
    assert_eq!(state.viewers.len(), 0);
}

#[tokio::test]
async fn test_upload_photos_accepts_free_form_session() {
    let (state, _temp_dir) = setup_test_env();
    let (status, body) = post_photos(
        app(&state),
        json!({"session": "Cabine 1", "photos": ["https://cdn.example.com/1.jpg"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response: UploadPhotosResponse = serde_json::from_slice(&body).unwrap();
    let record = wait_for_photos(&state, &response.viewer_id, 1).await;
    assert_eq!(record.session, "Cabine 1");
}

#[tokio::test]
async fn test_local_upload_round_trip() {
    let (state, _temp_dir) = setup_test_env();
    let (_, body) = post_photos(app(&state), json!({"photos": [jpeg_data_url()]})).await;
    let response: UploadPhotosResponse = serde_json::from_slice(&body).unwrap();
    let record = wait_for_photos(&state, &response.viewer_id, 1).await;

    let path = record.photos[0]
        .strip_prefix("http://localhost:3000")
        .unwrap()
        .to_string();
    let (status, _, bytes) = get(app(&state), &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, STANDARD.decode(JPEG_B64).unwrap());
}

#[tokio::test]
async fn test_visualizador_renders_without_client_bundle() {
    let (state, _temp_dir) = setup_test_env();
    let (_, body) = post_photos(
        app(&state),
        json!({"photos": ["https://cdn.example.com/1.jpg"], "print": "https://cdn.example.com/p.jpg"}),
    )
    .await;
    let response: UploadPhotosResponse = serde_json::from_slice(&body).unwrap();
    wait_for_photos(&state, &response.viewer_id, 1).await;
    // print resolves in the same pass as the photos
    let (status, _, html) = get(app(&state), &format!("/visualizador/{}", response.viewer_id)).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(html).unwrap();
    assert!(html.contains("https://cdn.example.com/1.jpg"));
    assert!(html.contains("https://cdn.example.com/p.jpg"));

    let (status, _, _) = get(app(&state), "/visualizador/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_visualizador_redirects_to_client_page() {
    let (state, _temp_dir) = setup_test_env();
    std::fs::create_dir_all(&state.settings.public_dir).unwrap();
    std::fs::write(
        state.settings.public_dir.join("visualizador.html"),
        "<html>viewer</html>",
    )
    .unwrap();

    let (status, headers, _) = get(app(&state), "/visualizador/abc123").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/visualizador.html?id=abc123");

    let (status, _, body) = get(app(&state), "/visualizador.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<html>viewer</html>");
}

#[tokio::test]
async fn test_health_counts() {
    let (state, _temp_dir) = setup_test_env();
    state.sessions.get_or_create("s1");
    post_photos(app(&state), json!({"photos": []})).await;

    let (status, _, body) = get(app(&state), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"ok": true, "sessions": 1, "viewers": 1}));
}
