// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between photobooth clients (phone, operator, viewer)
//! and the relay server.
//! This module defines the WebSocket event protocol and the HTTP payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a session a connection belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Desktop control station that drives capture
    Operator,
    /// Phone / preview page; `phone` is accepted on the wire as well
    #[serde(alias = "phone")]
    Viewer,
}

impl Role {
    /// The role that receives traffic sent by this one.
    pub fn other(self) -> Self {
        match self {
            Role::Operator => Role::Viewer,
            Role::Viewer => Role::Operator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

/// Final photo set submitted by a phone or an operator.
///
/// Used both as the payload of `photos_submit` / `create_viewer_session`
/// and as the body of `POST /upload_photos`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GallerySubmission {
    /// Session the photos belong to; the server default is used when absent
    #[serde(default)]
    pub session: Option<String>,
    /// Data URLs or already-hosted `http(s)` URLs, in display order
    #[serde(default)]
    pub photos: Vec<String>,
    /// Composed "stories" image
    #[serde(default)]
    pub stories_montage: Option<String>,
    /// Print layout image
    #[serde(default)]
    pub print: Option<String>,
}

/// Events sent from a client to the server.
///
/// On the wire every event is `{"event": "<snake_case name>", "data": {...}}`
/// with camelCase payload fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Join a session channel
    /// # Fields
    /// * `session` - Session to join (server default when absent)
    /// * `role` - `operator` or `viewer`
    JoinSession {
        #[serde(default)]
        session: Option<String>,
        role: Role,
    },
    /// Subscribe to a viewer channel, by explicit id or by latest gallery of a session
    JoinViewer {
        #[serde(default)]
        viewer_id: Option<String>,
        #[serde(default)]
        session: Option<String>,
    },
    /// Live preview frame (data URL)
    StreamFrame {
        #[serde(default)]
        session: Option<String>,
        frame: String,
    },
    /// Capture command
    TakePhoto {
        #[serde(default)]
        session: Option<String>,
        #[serde(default)]
        countdown: Option<u32>,
    },
    /// A single captured photo, for preview on the other side or on a viewer channel
    PhotoReady {
        #[serde(default)]
        session: Option<String>,
        #[serde(default)]
        viewer_id: Option<String>,
        photo: String,
        #[serde(default)]
        index: Option<u32>,
    },
    /// Phone finalizes a photo set
    #[serde(alias = "photos_from_cell")]
    PhotosSubmit(GallerySubmission),
    /// Operator finalizes a photo set
    CreateViewerSession(GallerySubmission),
    /// Boomerang clip (data URL or hosted URL)
    BoomerangReady {
        #[serde(default)]
        session: Option<String>,
        #[serde(default)]
        viewer_id: Option<String>,
        clip: String,
    },
    /// Clear live state of a session
    ResetSession {
        #[serde(default)]
        session: Option<String>,
    },
    /// Keep-alive
    Ping,
}

impl ClientMessage {
    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinSession { .. } => "join_session",
            ClientMessage::JoinViewer { .. } => "join_viewer",
            ClientMessage::StreamFrame { .. } => "stream_frame",
            ClientMessage::TakePhoto { .. } => "take_photo",
            ClientMessage::PhotoReady { .. } => "photo_ready",
            ClientMessage::PhotosSubmit(_) => "photos_submit",
            ClientMessage::CreateViewerSession(_) => "create_viewer_session",
            ClientMessage::BoomerangReady { .. } => "boomerang_ready",
            ClientMessage::ResetSession { .. } => "reset_session",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Finalized gallery reachable through a shareable link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRecord {
    pub viewer_id: String,
    /// Session that produced the gallery (informational only)
    pub session: String,
    pub photos: Vec<String>,
    pub stories_montage: Option<String>,
    pub print: Option<String>,
    pub boomerang: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Events sent from the server to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Acknowledges `join_session`
    JoinedSession { session: String, role: Role },
    /// Membership changed
    SessionMembers {
        session: String,
        operators: usize,
        viewers: usize,
    },
    /// Relayed or cached preview frame
    StreamFrame { session: String, frame: String },
    /// No preview frame is cached for the session yet
    StreamPending { session: String },
    /// Relayed capture command
    TakePhoto {
        session: String,
        countdown: Option<u32>,
    },
    /// Relayed single photo
    PhotoReady {
        session: String,
        viewer_id: Option<String>,
        photo: String,
        index: Option<u32>,
    },
    /// A viewer record was minted; uploads may still be running
    ViewerSessionCreated { viewer_id: String, session: String },
    /// Viewer record with resolved URLs
    ViewerPhotosReady(ViewerRecord),
    /// Link to show as a QR code
    ShowQr {
        viewer_id: String,
        visualizador_url: String,
    },
    /// Boomerang clip stored
    BoomerangReady {
        session: String,
        viewer_id: Option<String>,
        url: Option<String>,
    },
    /// Lookup miss for `join_viewer`
    ViewerNotFound {
        viewer_id: Option<String>,
        session: Option<String>,
    },
    /// Cached frame and membership of the session were cleared. Clients must
    /// send `join_session` again; until then they are treated as unjoined.
    SessionReset { session: String },
    /// Reply to `ping`
    Pong,
}

/// Response to `POST /upload_photos`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadPhotosResponse {
    pub ok: bool,
    pub viewer_id: String,
    pub visualizador_url: String,
}

/// Response to `GET /health`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub ok: bool,
    pub sessions: usize,
    pub viewers: usize,
}
