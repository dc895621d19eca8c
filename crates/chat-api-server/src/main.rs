use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use chat_api_server::config::Settings;
use chat_api_server::logging::init_logger;
use chat_api_server::router::build_router;
use chat_api_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    let _log_guard = init_logger(&settings.logging)?;

    info!("🚀 Starting Chat API Server...");
    info!("✅ Configuration loaded");

    let sweep_every = Duration::from_secs(settings.session.sweep_interval_secs);
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    // Initialize services
    let state = AppState::from_settings(settings)?;
    let sweeper = state.store.clone().spawn_sweeper(sweep_every);
    info!("✅ Session store ready");

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
