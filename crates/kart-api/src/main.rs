//! Kart coupon service binary.
//!
//! # Usage
//!
//! ```bash
//! # Ingest the coupon sources, then serve validation requests
//! kart --config config.yaml serve
//!
//! # Re-run ingestion even if coupons are already loaded
//! kart migrate --force
//!
//! # Validate codes from the command line
//! KART_STORAGE__BACKEND=postgres kart validate SAVE1000 DISCOUNT50
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, Level};

use kart_api::http::{create_router, create_router_with_observability, AppState};
use kart_api::observability::{init_logging, init_metrics, LoggingConfig};
use kart_server::{build_validator, run_migration, ServerConfig};
use kart_storage::{CouponReader, IngestStore, MemoryCouponStore, PostgresCouponStore};

/// Kart - coupon ingestion and validation service
#[derive(Parser, Debug)]
#[command(name = "kart")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Load the coupon sources into the store and exit
    Migrate {
        /// Reload even if coupons are already present
        #[arg(long)]
        force: bool,
    },
    /// Serve the HTTP API (default)
    Serve,
    /// Validate one or more codes and print the verdicts
    Validate {
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        ServerConfig::load(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    init_logging(LoggingConfig {
        json_format: config.logging.json,
        default_level: parse_log_level(&config.logging.level),
        include_spans: false,
    });

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kart");

    let command = args.command.unwrap_or(Command::Serve);

    match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage backend");
            run_command(MemoryCouponStore::new_shared(), command, &config).await
        }
        "postgres" => {
            let pg_config = config.storage.postgres_config().ok_or_else(|| {
                anyhow::anyhow!("storage.database_url is required for postgres backend")
            })?;

            info!("Connecting to PostgreSQL database");
            let storage = PostgresCouponStore::from_config(&pg_config).await?;
            info!("PostgreSQL connection established");

            info!("Running database migrations");
            storage.run_migrations().await?;
            info!("Database migrations complete");

            run_command(Arc::new(storage), command, &config).await
        }
        _ => {
            error!("Unknown storage backend: {}", config.storage.backend);
            anyhow::bail!("Unknown storage backend: {}", config.storage.backend);
        }
    }
}

async fn run_command<S>(store: Arc<S>, command: Command, config: &ServerConfig) -> anyhow::Result<()>
where
    S: IngestStore + CouponReader,
{
    match command {
        Command::Migrate { force } => {
            run_migration(store, &config.ingest, force).await?;
            Ok(())
        }
        Command::Serve => {
            if config.ingest.migrate_on_start {
                run_migration(Arc::clone(&store), &config.ingest, false).await?;
            }
            let validator = build_validator(store, &config.filter).await?;
            serve(AppState::new(validator), config).await
        }
        Command::Validate { codes } => {
            if config.ingest.migrate_on_start {
                run_migration(Arc::clone(&store), &config.ingest, false).await?;
            }
            let validator = build_validator(store, &config.filter).await?;
            for code in codes {
                let verdict = if validator.validate(&code).await? {
                    "valid"
                } else {
                    "invalid"
                };
                println!("{code}\t{verdict}");
            }
            Ok(())
        }
    }
}

/// Run the HTTP server until a shutdown signal arrives.
async fn serve(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let router = if config.metrics.enabled {
        let metrics_state = init_metrics()?;
        info!("Metrics enabled at /metrics");
        create_router_with_observability(state, metrics_state)
    } else {
        create_router(state)
    };

    info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that branch never completes.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Parse log level from string.
fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
