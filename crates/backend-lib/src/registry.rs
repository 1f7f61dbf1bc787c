// ============================
// photobooth-backend/src/registry.rs
// ============================
//! Session registry and viewer channels.
//!
//! A session groups the operator and phone/viewer connections of one
//! photobooth and caches the last preview frame. A viewer channel groups the
//! browser tabs looking at one gallery. Both are plain rooms of connection
//! handles; nothing here is persisted.
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use photobooth_common::{Role, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type Tx = mpsc::UnboundedSender<ServerMessage>;

/// Transport-level identity of one socket
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnectionId,
    tx: Tx,
}

impl Connection {
    pub fn new(tx: Tx) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Queue a message for this socket. Returns false once the socket is gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// A set of connections that receive the same broadcasts
#[derive(Debug, Default)]
pub struct Room {
    members: HashMap<ConnectionId, Connection>,
}

impl Room {
    pub fn insert(&mut self, connection: Connection) {
        self.members.insert(connection.id, connection);
    }

    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.members.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Send to every member except `except`; returns how many sends succeeded
    pub fn broadcast(&self, msg: &ServerMessage, except: Option<ConnectionId>) -> usize {
        self.members
            .values()
            .filter(|c| Some(c.id) != except)
            .filter(|c| c.send(msg.clone()))
            .count()
    }
}

/// Last preview frame of a session and the role that sent it
#[derive(Clone, Debug, PartialEq)]
pub struct CachedFrame {
    pub frame: String,
    pub from: Role,
}

/// One photobooth instance
#[derive(Debug, Default)]
pub struct Session {
    operators: Room,
    viewers: Room,
    last_frame: Option<CachedFrame>,
}

impl Session {
    fn room(&self, role: Role) -> &Room {
        match role {
            Role::Operator => &self.operators,
            Role::Viewer => &self.viewers,
        }
    }

    fn room_mut(&mut self, role: Role) -> &mut Room {
        match role {
            Role::Operator => &mut self.operators,
            Role::Viewer => &mut self.viewers,
        }
    }
}

/// Read-only view of a session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    pub session: String,
    pub operators: usize,
    pub viewers: usize,
    pub last_frame: Option<CachedFrame>,
}

/// Who a session broadcast goes to
#[derive(Clone, Copy, Debug)]
pub enum Audience {
    All,
    Role(Role),
    AllExcept(ConnectionId),
}

/// Registry of live sessions keyed by session id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a session, creating an empty one on first access
    pub fn get_or_create(&self, session_id: &str) -> SessionInfo {
        let session = self.sessions.entry(session_id.to_string()).or_default();
        let info = SessionInfo {
            session: session_id.to_string(),
            operators: session.operators.len(),
            viewers: session.viewers.len(),
            last_frame: session.last_frame.clone(),
        };
        drop(session);
        gauge!(crate::metrics::SESSION_ACTIVE).set(self.sessions.len() as f64);
        info
    }

    /// Add a connection under `role`; it leaves the other role's set if it was there
    pub fn add_member(&self, session_id: &str, connection: Connection, role: Role) {
        let mut session = self.sessions.entry(session_id.to_string()).or_default();
        session.room_mut(role.other()).remove(&connection.id);
        session.room_mut(role).insert(connection);
    }

    /// Remove a connection from both role sets. Returns false if it was not a member.
    pub fn remove_member(&self, session_id: &str, connection_id: &ConnectionId) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                let was_operator = session.operators.remove(connection_id);
                let was_viewer = session.viewers.remove(connection_id);
                was_operator || was_viewer
            },
            None => false,
        }
    }

    pub fn set_last_frame(&self, session_id: &str, frame: String, from: Role) {
        let mut session = self.sessions.entry(session_id.to_string()).or_default();
        session.last_frame = Some(CachedFrame { frame, from });
    }

    pub fn get_last_frame(&self, session_id: &str) -> Option<CachedFrame> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.last_frame.clone())
    }

    /// Clear the cached frame, and membership when `clear_members` is set.
    /// The session entry itself stays in the map.
    pub fn reset(&self, session_id: &str, clear_members: bool) {
        let mut session = self.sessions.entry(session_id.to_string()).or_default();
        session.last_frame = None;
        if clear_members {
            session.operators.clear();
            session.viewers.clear();
        }
    }

    /// `(operators, viewers)` of a session; zero for unknown sessions
    pub fn member_counts(&self, session_id: &str) -> (usize, usize) {
        self.sessions
            .get(session_id)
            .map_or((0, 0), |s| (s.operators.len(), s.viewers.len()))
    }

    pub fn is_member(&self, session_id: &str, role: Role, connection_id: &ConnectionId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|s| s.room(role).contains(connection_id))
    }

    /// Send a message to part of a session; returns the number of recipients
    pub fn broadcast(&self, session_id: &str, audience: Audience, msg: &ServerMessage) -> usize {
        let Some(session) = self.sessions.get(session_id) else {
            return 0;
        };
        match audience {
            Audience::All => session.operators.broadcast(msg, None) + session.viewers.broadcast(msg, None),
            Audience::Role(role) => session.room(role).broadcast(msg, None),
            Audience::AllExcept(id) => {
                session.operators.broadcast(msg, Some(id)) + session.viewers.broadcast(msg, Some(id))
            },
        }
    }

    /// Tell every member how many operators and viewers are connected
    pub fn announce_members(&self, session_id: &str) {
        let (operators, viewers) = self.member_counts(session_id);
        let msg = ServerMessage::SessionMembers {
            session: session_id.to_string(),
            operators,
            viewers,
        };
        self.broadcast(session_id, Audience::All, &msg);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Rooms keyed by viewer id
#[derive(Clone, Default)]
pub struct ViewerChannels {
    channels: Arc<DashMap<String, Room>>,
}

impl ViewerChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, viewer_id: &str, connection: Connection) {
        self.channels
            .entry(viewer_id.to_string())
            .or_default()
            .insert(connection);
    }

    pub fn unsubscribe(&self, viewer_id: &str, connection_id: &ConnectionId) {
        if let Some(mut room) = self.channels.get_mut(viewer_id) {
            room.remove(connection_id);
        }
        self.channels.remove_if(viewer_id, |_, room| room.is_empty());
    }

    /// Remove a connection from every channel it listens on
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) {
        self.channels.retain(|_, room| {
            room.remove(connection_id);
            !room.is_empty()
        });
    }

    pub fn broadcast(&self, viewer_id: &str, msg: &ServerMessage) -> usize {
        self.channels
            .get(viewer_id)
            .map_or(0, |room| room.broadcast(msg, None))
    }

    pub fn subscriber_count(&self, viewer_id: &str) -> usize {
        self.channels.get(viewer_id).map_or(0, |room| room.len())
    }
}
