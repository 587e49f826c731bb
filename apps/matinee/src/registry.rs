use dashmap::DashMap;
use matinee_proto::{generate_connection_id, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnectionId = String;

/// Bookkeeping for one live websocket connection.
pub struct Connection {
    pub username: String,
    /// Back-reference to the room this connection sits in, if any. Updated
    /// on join/leave; never a source of authority.
    pub room_id: Option<String>,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Tracks every live connection and the room it is attached to.
///
/// The registry never mutates room membership itself; the websocket task
/// runs the room-store leave before unregistering, so no stale membership
/// outlives the socket.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> ConnectionId {
        let id = generate_connection_id();
        self.connections.insert(
            id.clone(),
            Connection {
                username: "Guest".to_string(),
                room_id: None,
                tx,
            },
        );
        id
    }

    /// Idempotent; unknown ids are a no-op.
    pub fn unregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!(%connection_id, "connection unregistered");
        }
    }

    pub fn lookup_room(&self, connection_id: &str) -> Option<String> {
        self.connections
            .get(connection_id)
            .and_then(|conn| conn.room_id.clone())
    }

    pub fn username(&self, connection_id: &str) -> String {
        self.connections
            .get(connection_id)
            .map(|conn| conn.username.clone())
            .unwrap_or_else(|| "Guest".to_string())
    }

    /// Blank names are ignored; the default label stands.
    pub fn set_username(&self, connection_id: &str, username: &str) {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.username = trimmed.to_string();
        }
    }

    pub fn set_room(&self, connection_id: &str, room_id: Option<String>) {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.room_id = room_id;
        }
    }

    /// Fire-and-forget. A closed receiver just means the writer task is
    /// gone; the disconnect path will clean the entry up.
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) {
        if let Some(conn) = self.connections.get(connection_id) {
            let _ = conn.tx.send(message);
        }
    }
}
