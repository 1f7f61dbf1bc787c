// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_DROPPED_EVENT: &str = "ws.dropped_event";
pub const FRAME_RELAYED: &str = "relay.frame";
pub const SESSION_ACTIVE: &str = "session.active";
pub const GALLERY_CREATED: &str = "gallery.created";
pub const VIEWER_RECORDS: &str = "viewer.records";
pub const VIEWER_EXPIRED: &str = "viewer.expired";
pub const UPLOAD_OUTCOME: &str = "upload.outcome";
pub const UPLOAD_ATTEMPT_FAILED: &str = "upload.attempt_failed";
