// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket Handler Module
//!
//! The `RelayHandler` is instantiated per connection and holds the state of a
//! single client:
//! - which session it joined and under which role,
//! - which viewer channel it is subscribed to.
//!
//! It dispatches validated client events against the shared application state
//! and cleans up membership when the socket goes away.

use std::sync::Arc;

use metrics::counter;
use photobooth_common::{ClientMessage, Role, ServerMessage};

use crate::registry::{Audience, Connection, ConnectionId, Tx};
use crate::relay;
use crate::AppState;

/// Per-connection relay state
pub struct RelayHandler {
    state: Arc<AppState>,
    connection: Connection,
    joined: Option<(String, Role)>,
    subscription: Option<String>,
}

impl RelayHandler {
    pub fn new(state: Arc<AppState>, tx: Tx) -> Self {
        Self {
            state,
            connection: Connection::new(tx),
            joined: None,
            subscription: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    /// Session and role this connection joined, if any
    pub fn joined(&self) -> Option<(&str, Role)> {
        self.joined.as_ref().map(|(session, role)| (session.as_str(), *role))
    }

    /// Viewer channel this connection listens on, if any
    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// Explicit session, else the joined one, else the fixed session
    fn session_for(&self, session: Option<&str>) -> String {
        match (session, &self.joined) {
            (Some(session), _) if !session.is_empty() => session.to_string(),
            (_, Some((joined, _))) => joined.clone(),
            _ => relay::resolve_session(&self.state, None),
        }
    }

    /// Role the sender speaks for in `session`. Senders that never joined,
    /// or whose membership was cleared by a reset, count as viewer.
    fn role_in(&self, session: &str) -> Role {
        match &self.joined {
            Some((joined, role))
                if joined == session
                    && self.state.sessions.is_member(session, *role, &self.connection.id) =>
            {
                *role
            },
            _ => Role::Viewer,
        }
    }

    /// Handle one validated client event
    pub fn handle_message(&mut self, msg: ClientMessage) {
        tracing::debug!("Connection {} sent {}", self.connection.id, msg.event_name());

        match msg {
            ClientMessage::JoinSession { session, role } => {
                let session = self.session_for(session.as_deref());
                self.join_session(session, role);
            },
            ClientMessage::JoinViewer { viewer_id, session } => {
                self.join_viewer(viewer_id, session);
            },
            ClientMessage::StreamFrame { session, frame } => {
                let session = self.session_for(session.as_deref());
                let role = self.role_in(&session);
                self.state.sessions.set_last_frame(&session, frame.clone(), role);
                let msg = ServerMessage::StreamFrame {
                    session: session.clone(),
                    frame,
                };
                let delivered = self
                    .state
                    .sessions
                    .broadcast(&session, Audience::Role(role.other()), &msg);
                counter!(crate::metrics::FRAME_RELAYED).increment(1);
                tracing::trace!("Frame from {} in {} reached {} clients", role.as_str(), session, delivered);
            },
            ClientMessage::TakePhoto { session, countdown } => {
                let session = self.session_for(session.as_deref());
                let role = self.role_in(&session);
                let msg = ServerMessage::TakePhoto {
                    session: session.clone(),
                    countdown,
                };
                self.state
                    .sessions
                    .broadcast(&session, Audience::Role(role.other()), &msg);
            },
            ClientMessage::PhotoReady {
                session,
                viewer_id,
                photo,
                index,
            } => {
                let session = self.session_for(session.as_deref());
                let msg = ServerMessage::PhotoReady {
                    session: session.clone(),
                    viewer_id: viewer_id.clone(),
                    photo,
                    index,
                };
                match viewer_id {
                    Some(viewer_id) => {
                        self.state.viewer_channels.broadcast(&viewer_id, &msg);
                    },
                    None => {
                        let role = self.role_in(&session);
                        self.state
                            .sessions
                            .broadcast(&session, Audience::Role(role.other()), &msg);
                    },
                }
            },
            ClientMessage::PhotosSubmit(mut submission)
            | ClientMessage::CreateViewerSession(mut submission) => {
                submission.session = Some(self.session_for(submission.session.as_deref()));
                relay::start_gallery(self.state.clone(), Some(self.connection.clone()), submission);
            },
            ClientMessage::BoomerangReady {
                session,
                viewer_id,
                clip,
            } => {
                let session = self.session_for(session.as_deref());
                tokio::spawn(relay::attach_boomerang(
                    self.state.clone(),
                    session,
                    viewer_id,
                    clip,
                ));
            },
            ClientMessage::ResetSession { session } => {
                let session = self.session_for(session.as_deref());
                self.reset_session(&session);
            },
            ClientMessage::Ping => {
                self.connection.send(ServerMessage::Pong);
            },
        }
    }

    fn join_session(&mut self, session: String, role: Role) {
        if let Some((previous, _)) = self.joined.take() {
            if previous != session && self.state.sessions.remove_member(&previous, &self.connection.id) {
                self.state.sessions.announce_members(&previous);
            }
        }

        self.state.sessions.get_or_create(&session);
        self.state
            .sessions
            .add_member(&session, self.connection.clone(), role);
        self.joined = Some((session.clone(), role));
        tracing::info!("Connection {} joined {} as {}", self.connection.id, session, role.as_str());

        self.connection.send(ServerMessage::JoinedSession {
            session: session.clone(),
            role,
        });
        let backfill = match self.state.sessions.get_last_frame(&session) {
            Some(cached) if cached.from == role.other() => ServerMessage::StreamFrame {
                session: session.clone(),
                frame: cached.frame,
            },
            _ => ServerMessage::StreamPending {
                session: session.clone(),
            },
        };
        self.connection.send(backfill);
        self.state.sessions.announce_members(&session);
    }

    fn join_viewer(&mut self, viewer_id: Option<String>, session: Option<String>) {
        let record = match &viewer_id {
            Some(id) => self.state.viewers.get(id),
            None => {
                let session = self.session_for(session.as_deref());
                self.state.viewers.find_latest_for_session(&session)
            },
        };

        // an explicit id is followed even before its record exists
        let channel = record
            .as_ref()
            .map(|r| r.viewer_id.clone())
            .or_else(|| viewer_id.clone());
        if let Some(channel) = channel {
            self.subscribe(channel);
        }

        match record {
            Some(record) => {
                self.connection.send(ServerMessage::ViewerPhotosReady(record));
            },
            None => {
                tracing::debug!("No viewer record for id {:?} / session {:?}", viewer_id, session);
                self.connection
                    .send(ServerMessage::ViewerNotFound { viewer_id, session });
            },
        }
    }

    fn subscribe(&mut self, viewer_id: String) {
        if self.subscription.as_deref() == Some(viewer_id.as_str()) {
            return;
        }
        if let Some(previous) = self.subscription.take() {
            self.state
                .viewer_channels
                .unsubscribe(&previous, &self.connection.id);
        }
        self.state
            .viewer_channels
            .subscribe(&viewer_id, self.connection.clone());
        self.subscription = Some(viewer_id);
    }

    fn reset_session(&mut self, session: &str) {
        tracing::info!("Connection {} reset session {}", self.connection.id, session);
        let msg = ServerMessage::SessionReset {
            session: session.to_string(),
        };
        self.state.sessions.broadcast(session, Audience::All, &msg);
        if !self.state.sessions.is_member(session, Role::Operator, &self.connection.id)
            && !self.state.sessions.is_member(session, Role::Viewer, &self.connection.id)
        {
            self.connection.send(msg);
        }
        self.state.sessions.reset(session, true);

        if self.joined.as_ref().is_some_and(|(joined, _)| joined == session) {
            self.joined = None;
        }
    }

    /// Drop every membership this connection holds
    pub fn disconnect(&mut self) {
        if let Some((session, _)) = self.joined.take() {
            if self.state.sessions.remove_member(&session, &self.connection.id) {
                self.state.sessions.announce_members(&session);
            }
        }
        self.subscription = None;
        self.state.viewer_channels.unsubscribe_all(&self.connection.id);
        tracing::debug!("Connection {} cleaned up", self.connection.id);
    }
}
