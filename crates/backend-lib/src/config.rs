// ============================
// photobooth-backend/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered with figment: built-in defaults, then an optional TOML
//! file, then `PHOTOBOOTH_*` variables, then the bare variables deployments
//! already use (`PORT`, `IMGBB_KEY`, `BASE_URL`, `VISUALIZADOR_ORIGIN`,
//! `FIXED_SESSION`).
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "photobooth.toml";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Interface to bind
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Image host API key; remote upload is disabled without it
    pub imgbb_key: Option<String>,
    /// Image host upload endpoint
    pub imgbb_endpoint: String,
    /// Public origin used to build absolute links
    pub base_url: Option<String>,
    /// Session used when a client does not name one
    pub fixed_session: String,
    /// Local fallback directory, served under `/uploads`
    pub uploads_dir: PathBuf,
    /// Client bundle directory, served at `/`
    pub public_dir: PathBuf,
    /// Per-attempt timeout for remote uploads
    pub upload_timeout_secs: u64,
    /// Extra remote attempts after the first one
    pub upload_retries: u32,
    /// Linear backoff step between remote attempts
    pub retry_backoff_ms: u64,
    /// Maximum photos accepted per gallery
    pub max_photos: usize,
    /// Request body limit for HTTP uploads
    pub max_body_bytes: usize,
    /// Write viewer records to disk and reload them at startup
    pub persist_viewers: bool,
    /// Viewer record lifetime; records live forever when unset
    pub viewer_ttl_secs: Option<u64>,
    /// Interval of the expiry sweep
    pub sweep_interval_secs: u64,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            imgbb_key: None,
            imgbb_endpoint: "https://api.imgbb.com/1/upload".to_string(),
            base_url: None,
            fixed_session: "default".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            public_dir: PathBuf::from("public"),
            upload_timeout_secs: 25,
            upload_retries: 0,
            retry_backoff_ms: 1000,
            max_photos: 3,
            max_body_bytes: 50 * 1024 * 1024,
            persist_viewers: false,
            viewer_ttl_secs: None,
            sweep_interval_secs: 60 * 60, // hourly
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit TOML file (missing files are skipped) and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path.as_ref())
            .extract()
            .map_err(|e| AppError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PHOTOBOOTH_"))
            .merge(Env::raw().only(&["PORT", "IMGBB_KEY", "BASE_URL", "FIXED_SESSION"]))
            .merge(
                Env::raw()
                    .only(&["VISUALIZADOR_ORIGIN"])
                    .map(|_| "base_url".into()),
            )
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::Config("port must be non-zero".to_string()));
        }
        if self.upload_timeout_secs == 0 {
            return Err(AppError::Config(
                "upload_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.fixed_session.trim().is_empty() {
            return Err(AppError::Config("fixed_session must not be empty".to_string()));
        }
        if self.max_photos == 0 {
            return Err(AppError::Config("max_photos must be at least 1".to_string()));
        }
        if let Some(base) = &self.base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(AppError::Config(format!(
                    "base_url must be an http(s) origin, got {base}"
                )));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid bind address: {e}")))
    }

    /// Public origin without a trailing slash
    pub fn public_origin(&self) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    /// Shareable link for a viewer record
    pub fn visualizador_url(&self, viewer_id: &str) -> String {
        format!("{}/visualizador/{viewer_id}", self.public_origin())
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn viewer_ttl(&self) -> Option<Duration> {
        self.viewer_ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
