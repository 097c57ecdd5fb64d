//! multistore -- multi-backend data gateway.
//!
//! `serve` builds every configured location and exposes the health and
//! metrics surface; `healthcheck` probes the locations once and prints the
//! report. SIGTERM/SIGINT handlers only stop accepting connections and wait
//! for in-flight requests before exiting.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use multistore::config::{Config, LoggingConfig};
use multistore::context::RequestContext;
use multistore::gateway::MultipleBackendGateway;
use multistore::location::LocationRegistry;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "multistore", version, about = "Multi-backend data gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "multistore.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the health and metrics server (default).
    Serve {
        /// Override the bind address (host:port).
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Probe every location once and print the report as JSON.
    Healthcheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = multistore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let registry = LocationRegistry::from_config(&config).await?;
    info!(
        locations = registry.len(),
        legacy = registry.legacy().unwrap_or("none"),
        "Location registry initialized"
    );
    let gateway = MultipleBackendGateway::new(registry)
        .with_health_concurrency(config.health.concurrency);

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, gateway, bind).await,
        Command::Healthcheck => {
            let report = gateway.healthcheck(&RequestContext::new()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Initialize tracing from the logging section. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn serve(
    config: Config,
    gateway: MultipleBackendGateway,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let bind_addr =
        bind.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        multistore::metrics::init_metrics()?;
        multistore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let state = Arc::new(multistore::AppState { config, gateway });
    let app = multistore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("multistore listening on {}", bind_addr);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections
    // and wait for in-flight requests to complete.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("multistore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
