// ============================
// photobooth-backend/src/http.rs
// ============================
//! Plain HTTP handlers: health, gallery upload, viewer lookup and the
//! shareable viewer page.
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use photobooth_common::{GallerySubmission, HealthResponse, UploadPhotosResponse, ViewerRecord};

use crate::error::AppError;
use crate::relay;
use crate::validation;
use crate::AppState;

/// Client page that renders a gallery by itself, if the bundle ships one
const VIEWER_PAGE: &str = "visualizador.html";

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        sessions: state.sessions.len(),
        viewers: state.viewers.len(),
    })
}

/// `POST /upload_photos`: answers as soon as the record exists
pub async fn upload_photos_handler(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<GallerySubmission>,
) -> Result<Json<UploadPhotosResponse>, AppError> {
    validation::validate_submission(&submission).map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let started = relay::start_gallery(state, None, submission);
    Ok(Json(UploadPhotosResponse {
        ok: true,
        viewer_id: started.viewer_id,
        visualizador_url: started.visualizador_url,
    }))
}

/// `GET /api/viewer/{id}`
pub async fn viewer_handler(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
) -> Result<Json<ViewerRecord>, AppError> {
    state
        .viewers
        .get(&viewer_id)
        .map(Json)
        .ok_or(AppError::ViewerNotFound(viewer_id))
}

/// `GET /visualizador/{id}`: hand over to the bundled page, or render one
pub async fn visualizador_handler(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
) -> Response {
    if state.settings.public_dir.join(VIEWER_PAGE).is_file() {
        let target = format!("/{VIEWER_PAGE}?id={}", escape_query(&viewer_id));
        return Redirect::to(&target).into_response();
    }

    match state.viewers.get(&viewer_id) {
        Some(record) => Html(render_gallery(&record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html(render_page("Gallery not found", "<p>This gallery does not exist or has expired.</p>")),
        )
            .into_response(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode everything outside the unreserved set
fn escape_query(text: &str) -> String {
    text.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            },
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn render_page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{body}\n</body></html>\n"
    )
}

fn render_gallery(record: &ViewerRecord) -> String {
    let mut body = String::new();
    if record.photos.is_empty() && record.print.is_none() && record.stories_montage.is_none() {
        body.push_str("<p>Your photos are still uploading. Refresh in a moment.</p>\n");
    }
    for (i, url) in record.photos.iter().enumerate() {
        let url = escape_html(url);
        body.push_str(&format!(
            "<figure><img src=\"{url}\" alt=\"Photo {}\"><a href=\"{url}\" download>Download</a></figure>\n",
            i + 1
        ));
    }
    for (label, url) in [("Stories", &record.stories_montage), ("Print", &record.print)] {
        if let Some(url) = url {
            let url = escape_html(url);
            body.push_str(&format!(
                "<figure><img src=\"{url}\" alt=\"{label}\"><a href=\"{url}\" download>{label}</a></figure>\n"
            ));
        }
    }
    if let Some(url) = &record.boomerang {
        let url = escape_html(url);
        body.push_str(&format!(
            "<figure><video src=\"{url}\" autoplay loop muted playsinline></video></figure>\n"
        ));
    }
    render_page("Your photos", &body)
}
