// ============================
// photobooth-backend/src/upload.rs
// ============================
//! Upload gateway.
//!
//! Sends base64 images to an ImgBB-compatible host and falls back to the local
//! uploads directory when the host is not configured, errors out or times out.
//! Callers get an [`UploadOutcome`] and decide what to do with it; nothing in
//! here ever panics or propagates an error.
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::join_all;
use metrics::counter;
use rand::{distr::Alphanumeric, Rng};
use regex::Regex;
use serde::Deserialize;
use tokio::time;

use crate::config::Settings;
use crate::error::AppError;
use crate::storage::Storage;

/// `data:<mime>[;param...];base64,<payload>`
static DATA_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+)(?:;[^,;]+)*;base64,(.*)$").unwrap()
});

/// Base64 alphabet with optional padding and line breaks, nothing else
static BARE_BASE64_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/\s]+={0,2}$").unwrap());

const MAX_NAME_LEN: usize = 40;

/// MIME assumed for a clip sent as bare base64
pub const DEFAULT_CLIP_MIME: &str = "video/webm";

/// Result of one upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// URL on the image host, or a URL the client had already uploaded
    Hosted(String),
    /// URL of the local fallback copy
    Local(String),
    /// Nothing usable; the field stays null
    Failed(String),
}

impl UploadOutcome {
    pub fn url(&self) -> Option<&str> {
        match self {
            UploadOutcome::Hosted(url) | UploadOutcome::Local(url) => Some(url),
            UploadOutcome::Failed(_) => None,
        }
    }

    pub fn into_url(self) -> Option<String> {
        match self {
            UploadOutcome::Hosted(url) | UploadOutcome::Local(url) => Some(url),
            UploadOutcome::Failed(_) => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Hosted(_) => "hosted",
            UploadOutcome::Local(_) => "local",
            UploadOutcome::Failed(_) => "failed",
        }
    }
}

/// What an upload input turned out to be
#[derive(Debug, PartialEq, Eq)]
pub enum UploadInput<'a> {
    /// Already-hosted `http(s)` URL
    Remote(&'a str),
    /// Inline base64 payload
    DataUrl { mime: &'a str, payload: &'a str },
    /// Anything else
    Unsupported,
}

pub fn classify(input: &str) -> UploadInput<'_> {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return UploadInput::Remote(trimmed);
    }
    match DATA_URL_REGEX.captures(trimmed) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(mime), Some(payload)) => UploadInput::DataUrl {
                mime: mime.as_str(),
                payload: payload.as_str(),
            },
            _ => UploadInput::Unsupported,
        },
        None => UploadInput::Unsupported,
    }
}

/// Base64 without a `data:` header. Padded length must be a multiple of four.
pub fn is_bare_base64(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() || !BARE_BASE64_REGEX.is_match(trimmed) {
        return false;
    }
    trimmed.chars().filter(|c| !c.is_ascii_whitespace()).count() % 4 == 0
}

/// Wrap a bare base64 clip into a data URL of [`DEFAULT_CLIP_MIME`];
/// data URLs and http(s) URLs pass through untouched.
pub fn clip_data_url(clip: &str) -> Cow<'_, str> {
    if is_bare_base64(clip) {
        Cow::Owned(format!("data:{DEFAULT_CLIP_MIME};base64,{}", clip.trim()))
    } else {
        Cow::Borrowed(clip)
    }
}

/// File extension for a MIME type
pub fn extension_for(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}

/// Keep `[A-Za-z0-9_-]`, cap the length, never return an empty name
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, AppError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| AppError::InvalidInput(format!("invalid base64 payload: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::InvalidInput("empty image payload".to_string()));
    }
    Ok(bytes)
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Option<HostImage>,
}

#[derive(Debug, Deserialize)]
struct HostImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    display_url: Option<String>,
}

/// Uploads images to the configured host with a local-disk fallback
#[derive(Clone)]
pub struct UploadGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    public_origin: String,
    storage: Arc<dyn Storage>,
}

impl UploadGateway {
    pub fn new(settings: &Settings, storage: Arc<dyn Storage>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: settings.imgbb_key.clone().filter(|k| !k.trim().is_empty()),
            endpoint: settings.imgbb_endpoint.clone(),
            timeout: settings.upload_timeout(),
            retries: settings.upload_retries,
            backoff: settings.retry_backoff(),
            public_origin: settings.public_origin(),
            storage,
        })
    }

    /// Whether remote uploads are attempted at all
    pub fn remote_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Upload one image given as a data URL (or pass an `http(s)` URL through)
    pub async fn upload_image(&self, input: &str, display_name: &str) -> UploadOutcome {
        let outcome = match classify(input) {
            UploadInput::Remote(url) => UploadOutcome::Hosted(url.to_string()),
            UploadInput::Unsupported => {
                tracing::warn!("Skipping upload {}: not a data URL or http(s) URL", display_name);
                UploadOutcome::Failed("unsupported input".to_string())
            },
            UploadInput::DataUrl { mime, payload } => {
                self.upload_payload(mime, payload, display_name).await
            },
        };
        counter!(crate::metrics::UPLOAD_OUTCOME, "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Upload several images concurrently. Output order matches input order and
    /// one failure never cancels the others.
    pub async fn upload_all(&self, items: &[(String, String)]) -> Vec<UploadOutcome> {
        join_all(
            items
                .iter()
                .map(|(input, name)| self.upload_image(input, name)),
        )
        .await
    }

    async fn upload_payload(&self, mime: &str, payload: &str, display_name: &str) -> UploadOutcome {
        let bytes = match decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Dropping upload {}: {}", display_name, e);
                return UploadOutcome::Failed(e.to_string());
            },
        };

        if let Some(key) = &self.api_key {
            match self.upload_remote(key, payload, display_name).await {
                Ok(url) => {
                    tracing::info!("Uploaded {} to image host", display_name);
                    return UploadOutcome::Hosted(url);
                },
                Err(e) => {
                    tracing::warn!("Image host upload of {} failed, using local copy: {}", display_name, e);
                },
            }
        }

        match self.write_local(mime, &bytes, display_name).await {
            Ok(url) => UploadOutcome::Local(url),
            Err(e) => {
                tracing::error!("Local fallback for {} failed: {}", display_name, e);
                UploadOutcome::Failed(e.to_string())
            },
        }
    }

    /// First attempt plus `retries` more, linear backoff in between
    async fn upload_remote(&self, key: &str, payload: &str, display_name: &str) -> Result<String, AppError> {
        let attempts = self.retries + 1;
        let mut last_error = AppError::Upload("no attempt made".to_string());

        for attempt in 1..=attempts {
            let result = match time::timeout(self.timeout, self.post_once(key, payload, display_name)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Upload(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ))),
            };

            match result {
                Ok(url) => return Ok(url),
                Err(e) => {
                    counter!(crate::metrics::UPLOAD_ATTEMPT_FAILED).increment(1);
                    tracing::debug!("Upload attempt {}/{} for {} failed: {}", attempt, attempts, display_name, e);
                    last_error = e;
                },
            }

            if attempt < attempts {
                time::sleep(self.backoff * attempt).await;
            }
        }

        Err(last_error)
    }

    async fn post_once(&self, key: &str, payload: &str, display_name: &str) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("key", key), ("image", payload), ("name", display_name)])
            .send()
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upload(format!("image host answered {status}")));
        }

        let body: HostResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upload(format!("unreadable host response: {e}")))?;

        if body.success == Some(false) {
            return Err(AppError::Upload("image host reported failure".to_string()));
        }

        body.data
            .and_then(|d| d.display_url.or(d.url))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Upload("image host response has no URL".to_string()))
    }

    async fn write_local(&self, mime: &str, bytes: &[u8], display_name: &str) -> Result<String, AppError> {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let file_name = format!(
            "{}_{}_{}.{}",
            sanitize_name(display_name),
            chrono::Utc::now().timestamp_millis(),
            suffix,
            extension_for(mime)
        );
        self.storage.write_upload(&file_name, bytes).await?;
        Ok(format!("{}/uploads/{}", self.public_origin, file_name))
    }
}
