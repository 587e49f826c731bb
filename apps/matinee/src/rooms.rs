use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use matinee_proto::PlaybackState;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::RoomError;
use crate::host;
use crate::registry::ConnectionId;

/// One member of a room. The member list is kept in join order because
/// host succession depends on it.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub username: String,
}

/// Per-room state. Owned exclusively by the `RoomStore`; every mutation
/// happens under this room's mutex.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub members: Vec<Member>,
    pub host_id: Option<ConnectionId>,
    pub playback: PlaybackState,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: Vec::new(),
            host_id: None,
            playback: PlaybackState::default(),
        }
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.members
            .iter()
            .any(|member| member.connection_id == connection_id)
    }
}

#[derive(Debug)]
pub struct JoinOutcome {
    /// Canonical (lowercased) room id, echoed back to the joiner.
    pub room_id: String,
    pub is_host: bool,
    pub member_count: usize,
    /// The connection was already a member; nothing about the room changed
    /// except possibly its display name.
    pub rejoined: bool,
}

#[derive(Debug)]
pub struct LeaveOutcome {
    pub username: String,
    /// Set when the departure triggered host succession.
    pub new_host: Option<ConnectionId>,
    pub member_count: usize,
    pub room_removed: bool,
}

/// In-memory table of rooms. Each room is guarded by its own mutex so two
/// rooms never contend with each other; the table itself is a `DashMap`,
/// so there is no global lock either.
#[derive(Clone)]
pub struct RoomStore {
    rooms: Arc<DashMap<String, Arc<Mutex<Room>>>>,
    id_length: usize,
}

impl RoomStore {
    pub fn new(id_length: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            id_length,
        }
    }

    /// Create an empty room under a fresh code. Collisions regenerate, so
    /// this never fails.
    pub fn create(&self) -> String {
        loop {
            let id = self.generate_room_id();
            match self.rooms.entry(id.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(Room::new(id.clone()))));
                    info!(room = %id, "room created");
                    return id;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(&normalize(room_id)).map(|room| room.clone())
    }

    /// Add a member. The first joiner of an empty room becomes host;
    /// otherwise authority is unchanged. A connection rejoining a room it
    /// is already in keeps its place in the succession order and only
    /// refreshes its display name.
    ///
    /// `notify` runs while the room lock is still held, so anything it
    /// sends reaches members in the same order the mutations happened.
    pub async fn join(
        &self,
        room_id: &str,
        connection_id: &str,
        username: &str,
        notify: impl FnOnce(&Room, &JoinOutcome),
    ) -> Result<JoinOutcome, RoomError> {
        let key = normalize(room_id);
        loop {
            let handle = self.get(&key).ok_or(RoomError::RoomNotFound)?;
            let mut room = handle.lock().await;

            // The room may have been torn down (or replaced under the same
            // code) while we waited for the lock; retry against the table.
            let still_live = self
                .rooms
                .get(&key)
                .map(|entry| Arc::ptr_eq(entry.value(), &handle))
                .unwrap_or(false);
            if !still_live {
                continue;
            }

            if let Some(index) = room
                .members
                .iter()
                .position(|m| m.connection_id == connection_id)
            {
                room.members[index].username = username.to_string();
                let outcome = JoinOutcome {
                    room_id: key,
                    is_host: host::is_host(&room, connection_id),
                    member_count: room.members.len(),
                    rejoined: true,
                };
                notify(&room, &outcome);
                return Ok(outcome);
            }

            room.members.push(Member {
                connection_id: connection_id.to_string(),
                username: username.to_string(),
            });
            host::elect_on_join(&mut room, connection_id);
            let outcome = JoinOutcome {
                room_id: key,
                is_host: host::is_host(&room, connection_id),
                member_count: room.members.len(),
                rejoined: false,
            };
            notify(&room, &outcome);
            return Ok(outcome);
        }
    }

    /// Remove a member, running host succession when the host departs and
    /// tearing the room down when the last member leaves. Unknown rooms or
    /// non-members are a no-op.
    ///
    /// `notify` runs under the room lock, after the departed member is
    /// gone from the list. Concurrent leaves therefore notify in the same
    /// order their removals were serialized, so member counts only shrink.
    pub async fn leave(
        &self,
        room_id: &str,
        connection_id: &str,
        notify: impl FnOnce(&Room, &LeaveOutcome),
    ) -> Option<LeaveOutcome> {
        let key = normalize(room_id);
        let handle = self.get(&key)?;
        let mut room = handle.lock().await;

        let index = room
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)?;
        let member = room.members.remove(index);

        let outcome = if room.members.is_empty() {
            room.host_id = None;
            // Last one out turns off the lights. Removal happens under the
            // room lock, so a racing join sees the table entry gone.
            self.rooms.remove(&key);
            debug!(room = %key, "room emptied and removed");
            LeaveOutcome {
                username: member.username,
                new_host: None,
                member_count: 0,
                room_removed: true,
            }
        } else {
            LeaveOutcome {
                username: member.username,
                new_host: host::succeed(&mut room, connection_id),
                member_count: room.members.len(),
                room_removed: false,
            }
        };
        notify(&room, &outcome);
        Some(outcome)
    }

    pub async fn playback_state(&self, room_id: &str) -> Option<PlaybackState> {
        let handle = self.get(room_id)?;
        let room = handle.lock().await;
        Some(room.playback.clone())
    }

    fn generate_room_id(&self) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.id_length)
            .map(char::from)
            .collect();
        id.to_ascii_lowercase()
    }
}

/// Room ids are case-insensitive on the wire.
fn normalize(room_id: &str) -> String {
    room_id.trim().to_ascii_lowercase()
}
