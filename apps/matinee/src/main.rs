use clap::Parser;
use tracing::{error, info};

use matinee::{
    app_router,
    cli::{self, Cli, Commands},
    config::Config,
    websocket::AppState,
};

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Check if running as probe client
    if let Some(Commands::Probe {
        url,
        room,
        username,
        watch_secs,
    }) = cli.command
    {
        if let Err(e) = cli::run_probe(url, room, username, watch_secs).await {
            error!("probe error: {e}");
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("starting matinee sync server on port {}", config.port);
    info!(
        "sync request timeout: {} ms (retry every {} ms)",
        config.sync_request_timeout_ms, config.sync_retry_interval_ms
    );

    let state = AppState::new(config.clone());
    let app = app_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    info!("matinee listening on {addr}");

    axum::serve(listener, app)
        .await
        .expect("failed to start server");
}
