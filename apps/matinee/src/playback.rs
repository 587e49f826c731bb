use matinee_proto::PlaybackState;

/// A playback control request from the room's host.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackIntent {
    ChangeVideo { video_id: String, start_time: f64 },
    Play { time: f64 },
    Pause { time: f64 },
    Seek { time: f64 },
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Apply a host intent to the room's last-known state.
///
/// Video changes replace the state wholesale; play/pause/seek update it in
/// place. Authorization happens at the caller, inside the room's critical
/// section.
pub fn apply(state: &mut PlaybackState, intent: &PlaybackIntent, now_ms: i64) {
    match intent {
        PlaybackIntent::ChangeVideo {
            video_id,
            start_time,
        } => {
            state.video_id = video_id.clone();
            state.position_seconds = *start_time;
            state.is_playing = false;
        }
        PlaybackIntent::Play { time } => {
            state.position_seconds = *time;
            state.is_playing = true;
        }
        PlaybackIntent::Pause { time } => {
            state.position_seconds = *time;
            state.is_playing = false;
        }
        PlaybackIntent::Seek { time } => {
            state.position_seconds = *time;
        }
    }
    // as_of never goes backwards, even if the wall clock does.
    state.as_of_ms = state.as_of_ms.max(now_ms);
}

/// Roll the captured position forward to `now_ms`. Used when reporting
/// state some time after it was captured; paused rooms report the captured
/// position unchanged.
pub fn projected_position(state: &PlaybackState, now_ms: i64) -> f64 {
    if !state.is_playing {
        return state.position_seconds;
    }
    let elapsed_secs = (now_ms - state.as_of_ms).max(0) as f64 / 1000.0;
    state.position_seconds + elapsed_secs
}
