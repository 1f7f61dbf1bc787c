// ============================
// photobooth-backend/src/viewers.rs
// ============================
//! Viewer record store and the expiry sweep.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::{counter, gauge};
use photobooth_common::ViewerRecord;
use rand::{distr::Alphanumeric, Rng};
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::AppState;

/// Length of generated viewer ids
pub const VIEWER_ID_LEN: usize = 12;

/// Gallery contents written into a record once uploads resolve
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GalleryFields {
    pub photos: Vec<String>,
    pub stories_montage: Option<String>,
    pub print: Option<String>,
}

fn generate_viewer_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(VIEWER_ID_LEN)
        .map(char::from)
        .collect()
}

/// In-memory map of viewer records keyed by viewer id
#[derive(Clone)]
pub struct ViewerStore {
    records: Arc<DashMap<String, ViewerRecord>>,
    ttl: Option<chrono::Duration>,
}

impl ViewerStore {
    /// Create a store; records get an expiry timestamp when `ttl` is set
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ttl: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()),
        }
    }

    /// Store a new record under a fresh id and return the id.
    /// The record is visible immediately, before any upload finished.
    pub fn create(&self, session: &str, fields: GalleryFields) -> String {
        let created_at = Utc::now();
        let record = |viewer_id: String| ViewerRecord {
            viewer_id,
            session: session.to_string(),
            photos: fields.photos.clone(),
            stories_montage: fields.stories_montage.clone(),
            print: fields.print.clone(),
            boomerang: None,
            created_at,
            expires_at: self.ttl.map(|ttl| created_at + ttl),
        };

        loop {
            let viewer_id = generate_viewer_id();
            // only ever insert into a vacant slot
            if let Entry::Vacant(slot) = self.records.entry(viewer_id.clone()) {
                slot.insert(record(viewer_id.clone()));
                counter!(crate::metrics::GALLERY_CREATED).increment(1);
                gauge!(crate::metrics::VIEWER_RECORDS).set(self.records.len() as f64);
                return viewer_id;
            }
        }
    }

    /// Replace the gallery fields of a record
    pub fn update(&self, viewer_id: &str, fields: GalleryFields) -> Result<ViewerRecord, AppError> {
        let mut record = self
            .records
            .get_mut(viewer_id)
            .ok_or_else(|| AppError::ViewerNotFound(viewer_id.to_string()))?;
        record.photos = fields.photos;
        record.stories_montage = fields.stories_montage;
        record.print = fields.print;
        Ok(record.clone())
    }

    pub fn set_boomerang(&self, viewer_id: &str, url: String) -> Result<ViewerRecord, AppError> {
        let mut record = self
            .records
            .get_mut(viewer_id)
            .ok_or_else(|| AppError::ViewerNotFound(viewer_id.to_string()))?;
        record.boomerang = Some(url);
        Ok(record.clone())
    }

    pub fn get(&self, viewer_id: &str) -> Option<ViewerRecord> {
        self.records.get(viewer_id).map(|r| r.clone())
    }

    /// Most recently created record of a session. Ties go to whichever is seen first.
    pub fn find_latest_for_session(&self, session: &str) -> Option<ViewerRecord> {
        let mut latest: Option<ViewerRecord> = None;
        for entry in self.records.iter() {
            let record = entry.value();
            if record.session != session {
                continue;
            }
            if latest.as_ref().is_none_or(|l| record.created_at > l.created_at) {
                latest = Some(record.clone());
            }
        }
        latest
    }

    /// Insert a record as-is (used when restoring from disk)
    pub fn insert(&self, record: ViewerRecord) {
        self.records.insert(record.viewer_id.clone(), record);
        gauge!(crate::metrics::VIEWER_RECORDS).set(self.records.len() as f64);
    }

    /// Drop every record whose expiry is at or before `now`; returns their ids
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut removed = Vec::new();
        self.records.retain(|id, record| match record.expires_at {
            Some(expires_at) if expires_at <= now => {
                removed.push(id.clone());
                false
            },
            _ => true,
        });
        if !removed.is_empty() {
            counter!(crate::metrics::VIEWER_EXPIRED).increment(removed.len() as u64);
            gauge!(crate::metrics::VIEWER_RECORDS).set(self.records.len() as f64);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Remove expired records from memory and from disk; returns how many were removed
pub async fn sweep_expired(state: &AppState) -> usize {
    sweep_expired_at(state, Utc::now()).await
}

/// [`sweep_expired`] against an explicit clock
pub async fn sweep_expired_at(state: &AppState, now: DateTime<Utc>) -> usize {
    let removed = state.viewers.remove_expired(now);
    for viewer_id in &removed {
        if let Err(e) = state.forget_viewer(viewer_id).await {
            tracing::error!("Failed to delete persisted viewer {}: {}", viewer_id, e);
        }
    }
    if !removed.is_empty() {
        tracing::info!("Swept {} expired viewer records", removed.len());
    }
    removed.len()
}

/// Spawn the periodic expiry sweep. Returns `None` when records never expire.
pub fn spawn_sweeper(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    state.settings.viewer_ttl()?;
    let period = state.settings.sweep_interval();

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep_expired(&state).await;
        }
    }))
}
