// ============================
// photobooth-backend/src/storage.rs
// ============================
//! Storage abstraction with flat-file implementation.
//!
//! Uploaded media lands directly in the root directory (served under
//! `/uploads`), viewer records as `viewers/<id>.json` below it.
use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use photobooth_common::ViewerRecord;
use tokio::fs as tokio_fs;
use uuid::Uuid;

use crate::error::AppError;

const VIEWERS_DIR: &str = "viewers";

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write an uploaded file and return its path
    async fn write_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, AppError>;

    /// Persist a viewer record
    async fn save_viewer(&self, record: &ViewerRecord) -> Result<(), AppError>;

    /// Load every persisted viewer record
    async fn load_viewers(&self) -> Result<Vec<ViewerRecord>, AppError>;

    /// Delete a persisted viewer record; deleting a missing record is not an error
    async fn delete_viewer(&self, viewer_id: &str) -> Result<(), AppError>;
}

/// Flat-file implementation of the Storage trait
#[derive(Clone, Debug)]
pub struct FlatFileStorage {
    root: PathBuf,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(VIEWERS_DIR))?;
        Ok(Self { root })
    }

    fn viewer_path(&self, viewer_id: &str) -> PathBuf {
        self.root.join(VIEWERS_DIR).join(format!("{viewer_id}.json"))
    }
}

/// Reject names that would escape the storage root
fn check_file_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(AppError::InvalidInput(format!("invalid file name: {name}")));
    }
    Ok(())
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn write_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
        check_file_name(file_name)?;
        let path = self.root.join(file_name);
        tokio_fs::write(&path, bytes).await?;
        Ok(path)
    }

    async fn save_viewer(&self, record: &ViewerRecord) -> Result<(), AppError> {
        check_file_name(&record.viewer_id)?;
        let path = self.viewer_path(&record.viewer_id);

        // temp file + rename: readers only ever see a complete record.
        // Each save gets its own temp file so concurrent saves never share one.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let json = serde_json::to_string_pretty(record)?;
        tokio_fs::write(&tmp, json).await?;
        if let Err(e) = tokio_fs::rename(&tmp, &path).await {
            let _ = tokio_fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load_viewers(&self) -> Result<Vec<ViewerRecord>, AppError> {
        let dir = self.root.join(VIEWERS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio_fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio_fs::read_to_string(&path).await?;
            match serde_json::from_str::<ViewerRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable viewer record {}: {}", path.display(), e);
                },
            }
        }
        Ok(records)
    }

    async fn delete_viewer(&self, viewer_id: &str) -> Result<(), AppError> {
        check_file_name(viewer_id)?;
        match tokio_fs::remove_file(self.viewer_path(viewer_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
