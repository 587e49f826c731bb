pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod host;
pub mod playback;
pub mod registry;
pub mod rooms;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, room_status};
use crate::websocket::{websocket_handler, AppState};

/// Assemble the full router: the HTTP status surface and the websocket
/// event channel, sharing one `AppState`.
pub fn app_router(state: AppState) -> Router {
    let http_routes = Router::new()
        .route("/health", get(health_check))
        .route("/rooms/:id", get(room_status))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state);

    Router::new()
        .merge(http_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
