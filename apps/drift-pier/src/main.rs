use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use drift_pier::{
    build_router,
    cli::{Cli, Commands},
    config::Config,
    registry::MatchRegistry,
    websocket::SignalingState,
};

#[tokio::main]
async fn main() {
    // Default to WARN if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Probe {
        url,
        interests,
        wait,
    }) = cli.command
    {
        if let Err(e) = drift_pier::cli::run_probe(url, interests, wait).await {
            error!("probe error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    info!("starting drift-pier on port {}", config.port);

    let registry = Arc::new(MatchRegistry::new());
    let state = SignalingState::new(registry);
    state.spawn_sweeper(
        Duration::from_secs(config.sweep_interval_seconds),
        Duration::from_secs(config.heartbeat_timeout_seconds),
    );

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("drift-pier listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
