//! Shared wire protocol for the matinee sync server and its clients.
//! Keeping this in a dedicated crate allows regeneration of bindings
//! for web clients without pulling in the server runtime.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum position delta (seconds) a client should treat as a deliberate
/// seek rather than normal playback progression. This is a sender-side
/// filter to avoid flooding; the server applies any host seek it receives.
pub const SEEK_DRIFT_THRESHOLD_SECS: f64 = 2.0;

/// Last-known playback state of a room, captured at `as_of_ms`.
///
/// Replaced wholesale on a video change, updated in place for
/// play/pause/seek. `as_of_ms` never decreases within a room's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub video_id: String,
    pub position_seconds: f64,
    pub is_playing: bool,
    pub as_of_ms: i64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            video_id: String::new(),
            position_seconds: 0.0,
            is_playing: false,
            as_of_ms: 0,
        }
    }
}

/// A host-reported snapshot, relayed verbatim to one requesting
/// connection. The host's local player is the source of truth here, so
/// the server never reinterprets these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub video_id: String,
    pub current_time: f64,
    pub is_playing: bool,
}

/// Messages sent from a client to the sync server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a fresh room; the server answers with `room_created`.
    CreateRoom,
    /// Update the display name attached to this connection.
    SetUsername { username: String },
    /// Join an existing room. Answered with `join_success` or `join_error`.
    JoinRoom { room_id: String, username: String },
    /// Host only: replace the room's video.
    ChangeVideo {
        video_id: String,
        #[serde(default)]
        start_time: f64,
    },
    /// Host only: resume playback at `time`.
    Play { time: f64 },
    /// Host only: pause playback at `time`.
    Pause { time: f64 },
    /// Host only: jump to `time` without changing play state.
    Seek { time: f64 },
    /// Ask the server to fetch a snapshot from the current host.
    RequestSync,
    /// Host's reply to `request_sync_from_host`, addressed to one member.
    SyncState { to: String, state: PlaybackSnapshot },
    /// Chat line; echoed to the whole room including the sender.
    ChatMessage { text: String },
    /// Liveness echo on the event channel.
    Ping,
}

/// Messages sent from the sync server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
    },
    JoinSuccess {
        room_id: String,
        is_host: bool,
        member_count: usize,
    },
    JoinError {
        reason: String,
    },
    /// Membership count changed.
    MemberUpdate {
        members: usize,
    },
    /// Sent to exactly one member when host authority passes to it.
    YouAreHost,
    ChangeVideo {
        video_id: String,
        start_time: f64,
        /// Display name of the member who changed the video.
        by: String,
    },
    Play {
        time: f64,
    },
    Pause {
        time: f64,
    },
    Seek {
        time: f64,
    },
    /// Sent to the host only: one member wants a state snapshot.
    RequestSyncFromHost {
        to: String,
    },
    /// Targeted snapshot for a late joiner or reconnecting member.
    SyncState {
        video_id: String,
        current_time: f64,
        is_playing: bool,
    },
    UserJoined {
        username: String,
    },
    UserLeft {
        username: String,
    },
    ChatMessage {
        user: String,
        text: String,
        /// Server-assigned, unix millis.
        timestamp: i64,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Generate a unique connection ID.
pub fn generate_connection_id() -> String {
    Uuid::new_v4().to_string()
}
