//! HTTP surface: `POST /generate-app`, `GET /health`, and a `/ws` status
//! stream, plus the process lifecycle around them.

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ServerSettings;
use crate::pipeline::Orchestrator;
use api::{AppState, SharedState};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for local UI development.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .fallback(api::not_found)
        .with_state(state)
}

/// Serve until SIGTERM or Ctrl-C, then purge container resources.
///
/// Returns whether the purge succeeded, which the caller turns into the
/// process exit code.
pub async fn start_server(config: ServerConfig, orchestrator: Orchestrator) -> Result<bool> {
    let state = Arc::new(AppState::new(orchestrator));
    let mut app = build_router(state.clone());

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode = config.dev_mode, "appgen listening");
    println!("appgen running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let purged = state.orchestrator.purge().await;
    if purged {
        info!("shutdown purge complete");
    } else {
        warn!("shutdown purge left resources behind");
    }
    Ok(purged)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received; draining requests");
}
