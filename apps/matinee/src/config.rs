use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// How long a hostless `request_sync` is retried before it is dropped.
    pub sync_request_timeout_ms: u64,
    /// Interval between host lookups while a sync request is pending.
    pub sync_retry_interval_ms: u64,
    /// Length of generated room codes.
    pub room_id_length: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("MATINEE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            sync_request_timeout_ms: env::var("MATINEE_SYNC_TIMEOUT_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(5_000),
            sync_retry_interval_ms: env::var("MATINEE_SYNC_RETRY_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(250),
            room_id_length: env::var("MATINEE_ROOM_ID_LEN")
                .ok()
                .and_then(|l| l.parse().ok())
                .unwrap_or(6),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            sync_request_timeout_ms: 5_000,
            sync_retry_interval_ms: 250,
            room_id_length: 6,
        }
    }
}
