//! bouncerd - admission-controlling reverse proxy.
//!
//! Listens for plain HTTP requests, runs each one through the configured
//! bouncer chains, and forwards the survivors to a single backend. Rules are
//! loaded from a YAML file at startup and can be re-read at runtime via
//! SIGHUP or the admin `POST /-/reload` endpoint.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use bouncer::admin::{AdminServer, AdminServerConfig};
use bouncer::config::{load_bouncers, RuleReloader};
use bouncer::decider::DeciderRegistry;
use bouncer::proxy::PipelineProxy;
use clap::Parser;
use hyper::Uri;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Configuration for the proxy server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Port to listen on
    #[arg(short, long, env = "BOUNCER_PORT", default_value = "4141")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Backend URL all surviving requests are forwarded to (e.g. "http://backend:8080")
    #[arg(long, env = "BOUNCER_BACKEND_URL")]
    backend_url: String,

    /// Path to the YAML rules file
    #[arg(long, env = "BOUNCER_RULES_FILE")]
    rules_file: std::path::PathBuf,

    /// Admin server port (health, metrics, reload)
    #[arg(long, env = "BOUNCER_ADMIN_PORT", default_value = "7469")]
    admin_port: u16,

    /// Largest request body the deciders will buffer, in bytes
    #[arg(long, env = "BOUNCER_MAX_BODY_BYTES", default_value = "2097152")]
    max_body_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    let backend: Uri = config.backend_url.parse()?;
    let registry = Arc::new(DeciderRegistry::with_builtins());
    let bouncers = load_bouncers(&config.rules_file, &registry)?;

    info!(
        backend = %backend,
        rules_file = %config.rules_file.display(),
        bouncers = bouncers.len(),
        "loaded rule set"
    );

    let proxy = Arc::new(
        PipelineProxy::new(&backend, bouncers, None)?.with_max_body_bytes(config.max_body_bytes),
    );

    let reloader = Arc::new(RuleReloader::new(
        config.rules_file.clone(),
        registry,
        proxy.pipeline(),
    ));

    let shutdown = CancellationToken::new();

    let admin = AdminServer::new(reloader.clone(), AdminServerConfig::with_port(config.admin_port));
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = admin.run(admin_shutdown).await {
            error!(error = %e, "admin server error");
        }
    });

    spawn_signal_handlers(shutdown.clone(), reloader);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        addr = %addr,
        admin_port = config.admin_port,
        max_body_bytes = config.max_body_bytes,
        "bouncerd starting"
    );

    proxy.serve(listener, shutdown).await?;

    info!("bouncerd stopped");
    Ok(())
}

/// SIGINT and SIGTERM trigger graceful shutdown; SIGHUP reloads the rules.
fn spawn_signal_handlers(shutdown: CancellationToken, reloader: Arc<RuleReloader>) {
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, initiating graceful shutdown");
                ctrl_c_shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("received SIGTERM, initiating graceful shutdown");
                    shutdown.cancel();
                }
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGTERM");
                }
            }
        });

        tokio::spawn(async move {
            match signal(SignalKind::hangup()) {
                Ok(mut sighup) => loop {
                    sighup.recv().await;
                    info!("received SIGHUP, reloading rules");
                    if let Err(e) = reloader.reload() {
                        error!(error = %e, "rule reload failed");
                    }
                },
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGHUP");
                }
            }
        });
    }
}
