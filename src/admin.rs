//! Admin server: health, metrics, and the rule-reload surface.
//!
//! Runs on a dedicated port so operational endpoints are never exposed on
//! the proxied listener.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RuleReloader;

/// Admin server configuration.
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_addr: String,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            port: 7469,
            bind_addr: "127.0.0.1".to_string(),
        }
    }
}

impl AdminServerConfig {
    /// Config with a custom port on the default bind address.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// The full bind address string.
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Reloader bound to the running pipeline.
    pub reloader: Arc<RuleReloader>,
}

/// The admin server.
pub struct AdminServer {
    config: AdminServerConfig,
    state: AdminState,
}

impl AdminServer {
    /// Build an admin server around a rule reloader.
    pub fn new(reloader: Arc<RuleReloader>, config: AdminServerConfig) -> Self {
        Self {
            config,
            state: AdminState { reloader },
        }
    }

    /// The admin router.
    ///
    /// - `GET /health` - liveness
    /// - `GET /ready` - readiness
    /// - `GET /metrics` - Prometheus text format
    /// - `POST /-/reload` - re-read the rules file and swap the rule set
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .route("/-/reload", post(reload_handler))
            .with_state(self.state.clone())
    }

    /// Serve until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let bind_addr = self.config.bind_string();
        let listener = TcpListener::bind(&bind_addr).await?;

        info!(addr = %bind_addr, "admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("admin server shutting down");
            })
            .await
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "Ready")
}

/// Swap the rule set from disk. The previous rule set stays active when the
/// load fails.
async fn reload_handler(State(state): State<AdminState>) -> impl IntoResponse {
    match state.reloader.reload() {
        Ok(count) => (StatusCode::OK, format!("installed {count} bouncers")),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    use prometheus::{Encoder, TextEncoder};

    let metrics = prometheus::default_registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metrics, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        String::from_utf8_lossy(&buffer).to_string(),
    )
        .into_response()
}
