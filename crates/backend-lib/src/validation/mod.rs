// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Message validation module.

use crate::upload;
use photobooth_common::{ClientMessage, GallerySubmission};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_SESSION_ID_LENGTH: usize = 128;
const MAX_VIEWER_ID_LENGTH: usize = 64;

static VIEWER_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Invalid viewer ID: {0}")]
    InvalidViewerId(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a session ID. Session ids are opaque: any printable text of
/// bounded length is accepted.
pub fn validate_session_id(session: &str) -> ValidationResult<&str> {
    let length = session.chars().count();
    if session.trim().is_empty() || length > MAX_SESSION_ID_LENGTH {
        return Err(ValidationError::InvalidSessionId(format!(
            "Session ID must be between 1 and {MAX_SESSION_ID_LENGTH} characters"
        )));
    }
    if session.chars().any(char::is_control) {
        return Err(ValidationError::InvalidSessionId(
            "Session ID must not contain control characters".to_string(),
        ));
    }
    Ok(session)
}

/// Validate a viewer ID
pub fn validate_viewer_id(viewer_id: &str) -> ValidationResult<&str> {
    if viewer_id.is_empty() || viewer_id.len() > MAX_VIEWER_ID_LENGTH {
        return Err(ValidationError::InvalidViewerId(format!(
            "Viewer ID must be between 1 and {MAX_VIEWER_ID_LENGTH} characters"
        )));
    }
    if !VIEWER_ID_REGEX.is_match(viewer_id) {
        return Err(ValidationError::InvalidViewerId(
            "Viewer ID can only contain letters and numbers".to_string(),
        ));
    }
    Ok(viewer_id)
}

/// A preview frame must be an inline image
pub fn validate_frame(frame: &str) -> ValidationResult<&str> {
    if !frame.starts_with("data:image/") {
        return Err(ValidationError::InvalidFrame(
            "Frame must be an image data URL".to_string(),
        ));
    }
    Ok(frame)
}

/// Photos and clips are either data URLs or already-hosted URLs
pub fn validate_media(media: &str) -> ValidationResult<&str> {
    if media.starts_with("data:") || media.starts_with("http://") || media.starts_with("https://") {
        Ok(media)
    } else {
        Err(ValidationError::InvalidMedia(
            "Media must be a data URL or an http(s) URL".to_string(),
        ))
    }
}

/// Clips may also arrive as bare base64 without a `data:` header
pub fn validate_clip(clip: &str) -> ValidationResult<&str> {
    if upload::is_bare_base64(clip) {
        return Ok(clip);
    }
    validate_media(clip).map_err(|_| {
        ValidationError::InvalidMedia(
            "Clip must be a data URL, an http(s) URL or base64".to_string(),
        )
    })
}

fn validate_optional_session(session: Option<&String>) -> ValidationResult<()> {
    match session {
        Some(session) => validate_session_id(session).map(|_| ()),
        None => Ok(()),
    }
}

fn validate_optional_viewer(viewer_id: Option<&String>) -> ValidationResult<()> {
    match viewer_id {
        Some(viewer_id) => validate_viewer_id(viewer_id).map(|_| ()),
        None => Ok(()),
    }
}

/// Validate a gallery submission; only identifiers are checked here,
/// unusable images end up as null URLs further down.
pub fn validate_submission(submission: &GallerySubmission) -> ValidationResult<()> {
    validate_optional_session(submission.session.as_ref())
}

/// Validate a client message
pub fn validate_client_message(msg: &ClientMessage) -> ValidationResult<()> {
    match msg {
        ClientMessage::JoinSession { session, .. } | ClientMessage::TakePhoto { session, .. } => {
            validate_optional_session(session.as_ref())
        },
        ClientMessage::ResetSession { session } => validate_optional_session(session.as_ref()),
        ClientMessage::JoinViewer { viewer_id, session } => {
            validate_optional_session(session.as_ref())?;
            validate_optional_viewer(viewer_id.as_ref())
        },
        ClientMessage::StreamFrame { session, frame } => {
            validate_optional_session(session.as_ref())?;
            validate_frame(frame)?;
            Ok(())
        },
        ClientMessage::PhotoReady {
            session,
            viewer_id,
            photo,
            ..
        } => {
            validate_optional_session(session.as_ref())?;
            validate_optional_viewer(viewer_id.as_ref())?;
            validate_media(photo)?;
            Ok(())
        },
        ClientMessage::PhotosSubmit(submission) | ClientMessage::CreateViewerSession(submission) => {
            validate_submission(submission)
        },
        ClientMessage::BoomerangReady {
            session,
            viewer_id,
            clip,
        } => {
            validate_optional_session(session.as_ref())?;
            validate_optional_viewer(viewer_id.as_ref())?;
            validate_clip(clip)?;
            Ok(())
        },
        ClientMessage::Ping => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photobooth_common::Role;

    #[test]
    fn test_session_id() {
        for session in ["default", "booth_1-a", "booth.1", "Cabine 1", "évento", "s1:stage"] {
            assert_eq!(validate_session_id(session), Ok(session));
        }
        assert_eq!(validate_session_id(&"é".repeat(128)).map(|s| s.len()), Ok(256));
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("   ").is_err());
        assert!(validate_session_id("line\nbreak").is_err());
        assert!(validate_session_id("bell\u{7}").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_viewer_id() {
        assert!(validate_viewer_id("aB3dE5gH7jK9").is_ok());
        assert!(validate_viewer_id("../etc").is_err());
        assert!(validate_viewer_id("").is_err());
    }

    #[test]
    fn test_frame_must_be_image_data_url() {
        assert!(validate_frame("data:image/jpeg;base64,AAAA").is_ok());
        assert!(validate_frame("https://example.com/frame.jpg").is_err());
        assert!(validate_frame("data:text/plain;base64,AAAA").is_err());
    }

    #[test]
    fn test_clip_accepts_bare_base64() {
        assert!(validate_clip("GkXfo59ChoEBQveBAULygQRC84EIQoKEd2VibUKHgQRChYECGFOAZwEAAAAAAAAA").is_ok());
        assert!(validate_clip("data:video/mp4;base64,AAAA").is_ok());
        assert!(validate_clip("https://cdn.example.com/b.mp4").is_ok());
        assert!(validate_clip("blob:https://booth/123").is_err());
        assert!(validate_clip("").is_err());
    }

    #[test]
    fn test_validate_client_message() {
        let ok = ClientMessage::JoinSession {
            session: Some("s1".to_string()),
            role: Role::Operator,
        };
        assert!(validate_client_message(&ok).is_ok());

        let bad_session = ClientMessage::TakePhoto {
            session: Some("s\t1".to_string()),
            countdown: Some(3),
        };
        assert!(matches!(
            validate_client_message(&bad_session),
            Err(ValidationError::InvalidSessionId(_))
        ));

        let bad_clip = ClientMessage::BoomerangReady {
            session: None,
            viewer_id: None,
            clip: "blob:xyz".to_string(),
        };
        assert!(matches!(
            validate_client_message(&bad_clip),
            Err(ValidationError::InvalidMedia(_))
        ));

        // submissions with garbage photos are accepted and resolved to nulls later
        let submission = ClientMessage::CreateViewerSession(GallerySubmission {
            photos: vec!["garbage".to_string()],
            ..GallerySubmission::default()
        });
        assert!(validate_client_message(&submission).is_ok());
        assert!(validate_client_message(&ClientMessage::Ping).is_ok());
    }
}
