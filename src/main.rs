//! # Bayeux Server
//!
//! Entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Session sweeper and inactivity monitor
//! - HTTP long-polling and WebSocket transports

use anyhow::Result;
use tracing::info;

use bayeux_server::config::Settings;
use bayeux_server::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    bayeux_server::telemetry::init_tracing();

    info!("Starting Bayeux Server...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
