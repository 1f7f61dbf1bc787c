// ============================
// photobooth-backend/src/lib.rs
// ============================
//! Core backend-lib functionality for the photobooth relay server.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod storage;
pub mod upload;
pub mod validation;
pub mod viewers;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::error::AppError;
use crate::registry::{SessionRegistry, ViewerChannels};
use crate::storage::Storage;
use crate::upload::UploadGateway;
use crate::viewers::ViewerStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// Live sessions
    pub sessions: SessionRegistry,
    /// Finalized galleries
    pub viewers: ViewerStore,
    /// Browser tabs watching a gallery
    pub viewer_channels: ViewerChannels,
    /// Image host client with local fallback
    pub uploads: UploadGateway,
    /// Storage backend
    pub storage: Arc<dyn Storage>,
    /// One write lock per persisted viewer record
    persist_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings, storage: Arc<dyn Storage>) -> Result<Self, AppError> {
        let uploads = UploadGateway::new(&settings, storage.clone())?;
        Ok(Self {
            viewers: ViewerStore::new(settings.viewer_ttl()),
            settings: Arc::new(settings),
            sessions: SessionRegistry::new(),
            viewer_channels: ViewerChannels::new(),
            uploads,
            storage,
            persist_locks: Arc::new(DashMap::new()),
        })
    }

    /// Load persisted viewer records into memory. Returns how many were restored;
    /// nothing is read unless persistence is enabled.
    pub async fn restore_viewers(&self) -> Result<usize, AppError> {
        if !self.settings.persist_viewers {
            return Ok(0);
        }
        let records = self.storage.load_viewers().await?;
        let count = records.len();
        for record in records {
            self.viewers.insert(record);
        }
        Ok(count)
    }

    /// Write a viewer record to storage when persistence is enabled.
    /// Failures are logged; the in-memory record stays authoritative.
    ///
    /// Saves of one record are serialized and each one snapshots the record
    /// under the lock, so the file always ends up with the latest state.
    pub async fn persist_viewer(&self, viewer_id: &str) {
        if !self.settings.persist_viewers {
            return;
        }
        let lock = self
            .persist_locks
            .entry(viewer_id.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let Some(record) = self.viewers.get(viewer_id) else {
            self.persist_locks
                .remove_if(viewer_id, |_, held| Arc::ptr_eq(held, &lock));
            return;
        };
        if let Err(e) = self.storage.save_viewer(&record).await {
            tracing::error!("Failed to persist viewer {}: {}", viewer_id, e);
        }
    }

    /// Delete a persisted viewer record and forget its write lock
    pub async fn forget_viewer(&self, viewer_id: &str) -> Result<(), AppError> {
        let lock = self.persist_locks.remove(viewer_id).map(|(_, lock)| lock);
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.storage.delete_viewer(viewer_id).await
    }
}
