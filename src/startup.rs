//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::BayeuxServer;
use crate::config::Settings;
use crate::presentation::http::{handlers, routes};
use crate::presentation::middleware::{cors, logging};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<BayeuxServer>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            server: Arc::new(BayeuxServer::new(settings.clone())),
            settings: Arc::new(settings),
        }
    }
}

/// Router with the full middleware stack
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
    background: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        handlers::health::init_server_start();

        let state = AppState::new(settings.clone());
        tracing::info!(
            timeout_ms = settings.bayeux.timeout_ms,
            max_sessions_per_browser = settings.browser.max_sessions_per_browser,
            max_inactivity_ms = settings.activity.max_inactivity_ms,
            "Bayeux server created"
        );

        // Sweeper and inactivity monitor
        let shutdown = CancellationToken::new();
        let background = state.server.spawn_background(shutdown.clone());

        // Build router with middleware
        let router = build_router(state.clone());

        // Bind to address
        let addr: SocketAddr = settings.server_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            state,
            background,
            shutdown,
        })
    }

    /// Run the server until ctrl-c
    pub async fn run_until_stopped(self) -> Result<()> {
        let server = self.state.server.clone();
        let token = self.shutdown.clone();

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutdown signal received");
                // Answer every suspended connect before connections drain
                server.shutdown();
                token.cancel();
            })
            .await?;

        self.shutdown.cancel();
        for task in self.background {
            let _ = task.await;
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}
