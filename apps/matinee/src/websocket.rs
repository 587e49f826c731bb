use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use matinee_proto::{ClientMessage, PlaybackSnapshot, ServerMessage};

use crate::config::Config;
use crate::error::RoomError;
use crate::playback::{self, PlaybackIntent};
use crate::registry::ConnectionRegistry;
use crate::host;
use crate::rooms::RoomStore;

/// Shared state for the websocket and HTTP surfaces.
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub rooms: RoomStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomStore::new(config.room_id_length),
            config: Arc::new(config),
        }
    }
}

/// WebSocket upgrade handler for `/ws`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Owns one client connection: registers it, pumps inbound frames through
/// the protocol handler, and treats any socket failure as an implicit
/// leave.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Outbound messages funnel through an unbounded channel so broadcasts
    // never block on a slow socket; a dedicated task drains it.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = state.registry.register(tx.clone());

    let writer_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!(connection_id = %writer_id, "writer task ended");
    });

    debug!(%connection_id, "websocket connected");

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%connection_id, error = %e, "websocket error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if let Err(e) = handle_client_message(message, &connection_id, &state, &tx).await
                    {
                        warn!(%connection_id, error = %e, "error handling message");
                        let _ = tx.send(ServerMessage::Error {
                            message: format!("failed to process message: {e}"),
                        });
                    }
                }
                Err(e) => {
                    warn!(%connection_id, error = %e, "unparseable client frame");
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("invalid message format: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            // axum answers transport pings itself
            _ => {}
        }
    }

    disconnect(&connection_id, &state).await;
}

/// Implicit leave: membership removal runs before the registry entry is
/// dropped, so no stale membership outlives the connection.
async fn disconnect(connection_id: &str, state: &AppState) {
    if let Some(room_id) = state.registry.lookup_room(connection_id) {
        leave_current_room(connection_id, &room_id, state).await;
    }
    state.registry.unregister(connection_id);
    debug!(%connection_id, "websocket disconnected");
}

async fn handle_client_message(
    message: ClientMessage,
    connection_id: &str,
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    match message {
        ClientMessage::CreateRoom => {
            let room_id = state.rooms.create();
            info!(room = %room_id, %connection_id, "room created for connection");
            let _ = tx.send(ServerMessage::RoomCreated { room_id });
        }

        ClientMessage::SetUsername { username } => {
            state.registry.set_username(connection_id, &username);
        }

        ClientMessage::JoinRoom { room_id, username } => {
            // One room per connection: joining elsewhere leaves the old
            // room first, with full succession semantics.
            if let Some(current) = state.registry.lookup_room(connection_id) {
                if !current.eq_ignore_ascii_case(room_id.trim()) {
                    leave_current_room(connection_id, &current, state).await;
                }
            }

            state.registry.set_username(connection_id, &username);
            let username = state.registry.username(connection_id);

            // Survivors are notified from inside the room's critical
            // section, so a racing join or leave cannot interleave its own
            // member_update between ours.
            let joined = state
                .rooms
                .join(&room_id, connection_id, &username, |room, outcome| {
                    if outcome.rejoined {
                        // already a member; the room has nothing new to hear
                        return;
                    }
                    let joined = ServerMessage::UserJoined {
                        username: username.clone(),
                    };
                    let update = ServerMessage::MemberUpdate {
                        members: outcome.member_count,
                    };
                    for member in &room.members {
                        if member.connection_id != connection_id {
                            state.registry.send_to(&member.connection_id, joined.clone());
                            state.registry.send_to(&member.connection_id, update.clone());
                        }
                    }
                })
                .await;

            match joined {
                Ok(outcome) => {
                    state
                        .registry
                        .set_room(connection_id, Some(outcome.room_id.clone()));
                    info!(
                        room = %outcome.room_id,
                        %connection_id,
                        is_host = outcome.is_host,
                        members = outcome.member_count,
                        "member joined"
                    );
                    let _ = tx.send(ServerMessage::JoinSuccess {
                        room_id: outcome.room_id.clone(),
                        is_host: outcome.is_host,
                        member_count: outcome.member_count,
                    });
                }
                Err(RoomError::RoomNotFound) => {
                    debug!(room = %room_id, %connection_id, "join rejected: room not found");
                    let _ = tx.send(ServerMessage::JoinError {
                        reason: "room not found".to_string(),
                    });
                }
            }
        }

        ClientMessage::ChangeVideo {
            video_id,
            start_time,
        } => {
            apply_intent(
                state,
                connection_id,
                PlaybackIntent::ChangeVideo {
                    video_id,
                    start_time,
                },
            )
            .await;
        }
        ClientMessage::Play { time } => {
            apply_intent(state, connection_id, PlaybackIntent::Play { time }).await;
        }
        ClientMessage::Pause { time } => {
            apply_intent(state, connection_id, PlaybackIntent::Pause { time }).await;
        }
        ClientMessage::Seek { time } => {
            apply_intent(state, connection_id, PlaybackIntent::Seek { time }).await;
        }

        ClientMessage::RequestSync => {
            forward_sync_request(state, connection_id);
        }

        ClientMessage::SyncState { to, state: snapshot } => {
            relay_snapshot(state, connection_id, to, snapshot).await;
        }

        ClientMessage::ChatMessage { text } => {
            fan_out_chat(state, connection_id, &text).await;
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }

    Ok(())
}

/// Apply a host intent to the room state and fan the resulting event out
/// to every member except the sender.
///
/// The whole operation runs inside the room's critical section so the
/// broadcast order matches intent acceptance order; each send is a
/// non-blocking channel push, so a stalled member cannot stall the room.
async fn apply_intent(state: &AppState, connection_id: &str, intent: PlaybackIntent) {
    let Some(room_id) = state.registry.lookup_room(connection_id) else {
        return;
    };
    let Some(handle) = state.rooms.get(&room_id) else {
        return;
    };
    let mut room = handle.lock().await;

    if !host::is_host(&room, connection_id) {
        // Followers never send control intents in normal operation; drop
        // quietly but leave a trace for diagnosing handover races.
        debug!(room = %room_id, %connection_id, ?intent, "dropping control intent from non-host");
        return;
    }

    playback::apply(&mut room.playback, &intent, playback::now_ms());

    let event = match intent {
        PlaybackIntent::ChangeVideo {
            video_id,
            start_time,
        } => ServerMessage::ChangeVideo {
            video_id,
            start_time,
            by: state.registry.username(connection_id),
        },
        PlaybackIntent::Play { time } => ServerMessage::Play { time },
        PlaybackIntent::Pause { time } => ServerMessage::Pause { time },
        PlaybackIntent::Seek { time } => ServerMessage::Seek { time },
    };

    for member in &room.members {
        if member.connection_id != connection_id {
            state.registry.send_to(&member.connection_id, event.clone());
        }
    }
}

/// Forward a resync request to the current host, retrying while the room
/// is mid-succession. Bounded: after `sync_request_timeout_ms` the request
/// is dropped without surfacing anything to the requester, whose own retry
/// logic covers it.
fn forward_sync_request(state: &AppState, connection_id: &str) {
    let Some(room_id) = state.registry.lookup_room(connection_id) else {
        return;
    };
    let requester = connection_id.to_string();
    let state = state.clone();

    tokio::spawn(async move {
        let deadline = Instant::now() + Duration::from_millis(state.config.sync_request_timeout_ms);
        loop {
            let Some(handle) = state.rooms.get(&room_id) else {
                return;
            };
            let host_id = {
                let room = handle.lock().await;
                room.host_id.clone()
            };
            match host_id {
                Some(host_id) if host_id != requester => {
                    state.registry.send_to(
                        &host_id,
                        ServerMessage::RequestSyncFromHost {
                            to: requester.clone(),
                        },
                    );
                    return;
                }
                // the requester holds authority itself; nothing to sync from
                Some(_) => return,
                None => {}
            }
            if Instant::now() >= deadline {
                debug!(room = %room_id, connection_id = %requester, "sync request timed out waiting for a host");
                return;
            }
            tokio::time::sleep(Duration::from_millis(state.config.sync_retry_interval_ms)).await;
        }
    });
}

/// Relay a host snapshot verbatim to exactly the requesting connection.
/// Snapshots from anyone but the current host are dropped, as are targets
/// that already left the room.
async fn relay_snapshot(
    state: &AppState,
    connection_id: &str,
    to: String,
    snapshot: PlaybackSnapshot,
) {
    let Some(room_id) = state.registry.lookup_room(connection_id) else {
        return;
    };
    let Some(handle) = state.rooms.get(&room_id) else {
        return;
    };
    {
        let room = handle.lock().await;
        if !host::is_host(&room, connection_id) {
            debug!(room = %room_id, %connection_id, "dropping snapshot from non-host");
            return;
        }
        if !room.contains(&to) {
            debug!(room = %room_id, target = %to, "snapshot target left the room");
            return;
        }
    }
    state.registry.send_to(
        &to,
        ServerMessage::SyncState {
            video_id: snapshot.video_id,
            current_time: snapshot.current_time,
            is_playing: snapshot.is_playing,
        },
    );
}

/// Chat goes to the whole room, sender included, stamped server-side.
async fn fan_out_chat(state: &AppState, connection_id: &str, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let Some(room_id) = state.registry.lookup_room(connection_id) else {
        return;
    };
    let message = ServerMessage::ChatMessage {
        user: state.registry.username(connection_id),
        text: text.to_string(),
        timestamp: playback::now_ms(),
    };
    broadcast_all(state, &room_id, message).await;
}

/// Run the room-store leave for this connection and notify survivors.
///
/// Notification happens inside the room's critical section; two leaves
/// racing each other fan out in the same order their removals were
/// serialized, so survivors only ever see the member count shrink.
async fn leave_current_room(connection_id: &str, room_id: &str, state: &AppState) {
    let outcome = state
        .rooms
        .leave(room_id, connection_id, |room, outcome| {
            if outcome.room_removed {
                return;
            }
            if let Some(new_host) = &outcome.new_host {
                state.registry.send_to(new_host, ServerMessage::YouAreHost);
            }
            let left = ServerMessage::UserLeft {
                username: outcome.username.clone(),
            };
            let update = ServerMessage::MemberUpdate {
                members: outcome.member_count,
            };
            // the departed member is already out of the list
            for member in &room.members {
                state.registry.send_to(&member.connection_id, left.clone());
                state.registry.send_to(&member.connection_id, update.clone());
            }
        })
        .await;
    state.registry.set_room(connection_id, None);

    if let Some(new_host) = outcome.and_then(|o| o.new_host) {
        info!(room = %room_id, host = %new_host, "host authority passed on");
    }
}

async fn broadcast_all(state: &AppState, room_id: &str, message: ServerMessage) {
    let Some(handle) = state.rooms.get(room_id) else {
        return;
    };
    let room = handle.lock().await;
    for member in &room.members {
        state.registry.send_to(&member.connection_id, message.clone());
    }
}
