use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;

use crate::playback;
use crate::websocket::AppState;

#[derive(Debug, Serialize)]
pub struct RoomStatusResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackStatus>,
}

#[derive(Debug, Serialize)]
pub struct PlaybackStatus {
    pub video_id: String,
    /// Captured position rolled forward to the time of the request.
    pub position_seconds: f64,
    pub is_playing: bool,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "matinee",
    }))
}

/// Read-only probe for a room: existence, member count, and the projected
/// playback position. Serves dashboards and the probe CLI; clients inside
/// the room get their state over the websocket instead.
pub async fn room_status(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(handle) = state.rooms.get(&room_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(RoomStatusResponse {
                exists: false,
                member_count: None,
                playback: None,
            }),
        );
    };

    let room = handle.lock().await;
    let status = (!room.playback.video_id.is_empty()).then(|| PlaybackStatus {
        video_id: room.playback.video_id.clone(),
        position_seconds: playback::projected_position(&room.playback, playback::now_ms()),
        is_playing: room.playback.is_playing,
    });

    (
        StatusCode::OK,
        Json(RoomStatusResponse {
            exists: true,
            member_count: Some(room.members.len()),
            playback: status,
        }),
    )
}
