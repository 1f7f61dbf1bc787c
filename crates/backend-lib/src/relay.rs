// ============================
// photobooth-backend/src/relay.rs
// ============================
//! Gallery finalization and boomerang handling.
//!
//! Both the WebSocket events and `POST /upload_photos` go through
//! [`start_gallery`]: the record is minted and announced right away, the
//! uploads run on a spawned task and the record is filled in when they settle.
use std::sync::Arc;

use photobooth_common::{GallerySubmission, Role, ServerMessage};
use tokio::task::JoinHandle;

use crate::registry::{Audience, Connection};
use crate::upload::{self, UploadOutcome};
use crate::viewers::GalleryFields;
use crate::AppState;

/// Explicit session, else the configured fixed session
pub fn resolve_session(state: &AppState, session: Option<&str>) -> String {
    match session {
        Some(session) if !session.is_empty() => session.to_string(),
        _ => state.settings.fixed_session.clone(),
    }
}

/// A gallery whose uploads are running
#[derive(Debug)]
pub struct StartedGallery {
    pub viewer_id: String,
    pub session: String,
    pub visualizador_url: String,
    /// Completes once the record holds its final URLs
    pub uploads: JoinHandle<()>,
}

/// Mint a viewer record for a submission and upload its images in the background.
///
/// `viewer_session_created` goes out to the requester and the session before
/// any upload starts; `viewer_photos_ready` and `show_qr` follow once the
/// record is updated.
pub fn start_gallery(
    state: Arc<AppState>,
    requester: Option<Connection>,
    submission: GallerySubmission,
) -> StartedGallery {
    let session = resolve_session(&state, submission.session.as_deref());
    let viewer_id = state.viewers.create(&session, GalleryFields::default());
    let visualizador_url = state.settings.visualizador_url(&viewer_id);
    tracing::info!("Created viewer {} for session {}", viewer_id, session);

    let created = ServerMessage::ViewerSessionCreated {
        viewer_id: viewer_id.clone(),
        session: session.clone(),
    };
    match &requester {
        Some(conn) => {
            conn.send(created.clone());
            state
                .sessions
                .broadcast(&session, Audience::AllExcept(conn.id), &created);
        },
        None => {
            state.sessions.broadcast(&session, Audience::All, &created);
        },
    }

    let uploads = tokio::spawn(complete_gallery(
        state,
        requester,
        session.clone(),
        viewer_id.clone(),
        submission,
    ));

    StartedGallery {
        viewer_id,
        session,
        visualizador_url,
        uploads,
    }
}

async fn complete_gallery(
    state: Arc<AppState>,
    requester: Option<Connection>,
    session: String,
    viewer_id: String,
    submission: GallerySubmission,
) {
    state.persist_viewer(&viewer_id).await;

    let max_photos = state.settings.max_photos;
    let mut photos = submission.photos;
    if photos.len() > max_photos {
        tracing::warn!(
            "Viewer {} got {} photos, keeping the first {}",
            viewer_id,
            photos.len(),
            max_photos
        );
        photos.truncate(max_photos);
    }

    let photo_count = photos.len();
    let mut items: Vec<(String, String)> = photos
        .into_iter()
        .enumerate()
        .map(|(i, photo)| (photo, format!("photo_{}", i + 1)))
        .collect();
    let montage_at = submission.stories_montage.map(|montage| {
        items.push((montage, "stories_montage".to_string()));
        items.len() - 1
    });
    let print_at = submission.print.map(|print| {
        items.push((print, "print".to_string()));
        items.len() - 1
    });

    let mut urls: Vec<Option<String>> = state
        .uploads
        .upload_all(&items)
        .await
        .into_iter()
        .map(UploadOutcome::into_url)
        .collect();

    let fields = GalleryFields {
        photos: urls[..photo_count].iter().flatten().cloned().collect(),
        stories_montage: montage_at.and_then(|i| urls[i].take()),
        print: print_at.and_then(|i| urls[i].take()),
    };

    let record = match state.viewers.update(&viewer_id, fields) {
        Ok(record) => record,
        Err(e) => {
            // only possible if the sweep removed it while uploads ran
            tracing::warn!("Viewer {} vanished before uploads finished: {}", viewer_id, e);
            return;
        },
    };
    state.persist_viewer(&viewer_id).await;
    tracing::info!(
        "Viewer {} ready with {}/{} photos",
        viewer_id,
        record.photos.len(),
        photo_count
    );

    let ready = ServerMessage::ViewerPhotosReady(record);
    let qr = ServerMessage::ShowQr {
        viewer_id: viewer_id.clone(),
        visualizador_url: state.settings.visualizador_url(&viewer_id),
    };
    state.sessions.broadcast(&session, Audience::All, &ready);
    state.viewer_channels.broadcast(&viewer_id, &ready);
    state.sessions.broadcast(&session, Audience::All, &qr);

    if let Some(conn) = requester {
        let in_session = state.sessions.is_member(&session, Role::Operator, &conn.id)
            || state.sessions.is_member(&session, Role::Viewer, &conn.id);
        if !in_session {
            conn.send(ready);
            conn.send(qr);
        }
    }
}

/// Upload a boomerang clip and attach it to a viewer record.
///
/// The record is the one named by `viewer_id`, else the latest of the session.
/// `boomerang_ready` is emitted even when no record matches, so the clip URL
/// is never lost.
pub async fn attach_boomerang(
    state: Arc<AppState>,
    session: String,
    viewer_id: Option<String>,
    clip: String,
) {
    let viewer_id = viewer_id.or_else(|| {
        state
            .viewers
            .find_latest_for_session(&session)
            .map(|record| record.viewer_id)
    });

    let clip = upload::clip_data_url(&clip);
    let url = state.uploads.upload_image(&clip, "boomerang").await.into_url();

    if let (Some(id), Some(url)) = (&viewer_id, &url) {
        match state.viewers.set_boomerang(id, url.clone()) {
            Ok(_) => state.persist_viewer(id).await,
            Err(e) => tracing::warn!("Boomerang for session {} not attached: {}", session, e),
        }
    }

    let msg = ServerMessage::BoomerangReady {
        session: session.clone(),
        viewer_id: viewer_id.clone(),
        url,
    };
    state.sessions.broadcast(&session, Audience::All, &msg);
    if let Some(id) = &viewer_id {
        state.viewer_channels.broadcast(id, &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::FlatFileStorage;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn state(settings: Settings) -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(FlatFileStorage::new(temp_dir.path()).unwrap());
        (Arc::new(AppState::new(settings, storage).unwrap()), temp_dir)
    }

    #[tokio::test]
    async fn test_resolve_session() {
        let (state, _temp_dir) = state(Settings::default());
        assert_eq!(resolve_session(&state, Some("s1")), "s1");
        assert_eq!(resolve_session(&state, Some("")), "default");
        assert_eq!(resolve_session(&state, None), "default");
    }

    #[tokio::test]
    async fn test_start_gallery_announces_then_completes() {
        let (state, _temp_dir) = state(Settings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let requester = Connection::new(tx);

        let submission = GallerySubmission {
            session: Some("s1".to_string()),
            photos: vec![
                "data:image/jpeg;base64,AAAA".to_string(),
                "nonsense".to_string(),
                "https://cdn.example.com/3.jpg".to_string(),
            ],
            stories_montage: None,
            print: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
        };
        let started = start_gallery(state.clone(), Some(requester), submission);
        assert_eq!(
            started.visualizador_url,
            format!("http://localhost:3000/visualizador/{}", started.viewer_id)
        );

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::ViewerSessionCreated {
                viewer_id: started.viewer_id.clone(),
                session: "s1".to_string(),
            }
        );

        started.uploads.await.unwrap();
        let record = state.viewers.get(&started.viewer_id).unwrap();
        assert_eq!(record.photos.len(), 2);
        assert!(record.photos[0].starts_with("http://localhost:3000/uploads/photo_1_"));
        assert_eq!(record.photos[1], "https://cdn.example.com/3.jpg");
        assert!(record.stories_montage.is_none());
        assert!(record.print.as_deref().unwrap().ends_with(".png"));

        // requester never joined the session, so it gets the results directly
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::ViewerPhotosReady(record));
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::ShowQr { .. }));
    }

    #[tokio::test]
    async fn test_extra_photos_are_dropped() {
        let (state, _temp_dir) = state(Settings::default());
        let submission = GallerySubmission {
            photos: (0..5).map(|i| format!("https://cdn.example.com/{i}.jpg")).collect(),
            ..GallerySubmission::default()
        };
        let started = start_gallery(state.clone(), None, submission);
        started.uploads.await.unwrap();

        let record = state.viewers.get(&started.viewer_id).unwrap();
        assert_eq!(record.session, "default");
        assert_eq!(record.photos.len(), 3);
    }

    #[tokio::test]
    async fn test_attach_boomerang_to_latest_record() {
        let (state, _temp_dir) = state(Settings::default());
        let started = start_gallery(state.clone(), None, GallerySubmission::default());
        started.uploads.await.unwrap();

        attach_boomerang(
            state.clone(),
            "default".to_string(),
            None,
            "data:video/webm;base64,GkXfow==".to_string(),
        )
        .await;

        let record = state.viewers.get(&started.viewer_id).unwrap();
        let boomerang = record.boomerang.unwrap();
        assert!(boomerang.starts_with("http://localhost:3000/uploads/boomerang_"));
        assert!(boomerang.ends_with(".webm"));
    }

    #[tokio::test]
    async fn test_attach_bare_base64_boomerang() {
        let (state, temp_dir) = state(Settings::default());
        let started = start_gallery(state.clone(), None, GallerySubmission::default());
        started.uploads.await.unwrap();

        attach_boomerang(
            state.clone(),
            "default".to_string(),
            Some(started.viewer_id.clone()),
            "GkXfow==".to_string(),
        )
        .await;

        let boomerang = state.viewers.get(&started.viewer_id).unwrap().boomerang.unwrap();
        assert!(boomerang.starts_with("http://localhost:3000/uploads/boomerang_"));
        assert!(boomerang.ends_with(".webm"));

        let file = temp_dir.path().join(boomerang.rsplit('/').next().unwrap());
        assert_eq!(std::fs::read(file).unwrap(), vec![0x1a, 0x45, 0xdf, 0xa3]);
    }
}
