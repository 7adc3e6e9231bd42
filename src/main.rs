//! Activity Gateway
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   ACTIVITY GATEWAY                    │
//!   Discord iframe   │  ┌──────────┐  ┌──────┐  ┌────────────┐               │
//!   ─────────────────┼─▶│ security │─▶│ CORS │─▶│ rate limit │──┐            │
//!                    │  │ headers  │  └──────┘  └────────────┘  │            │
//!                    │  └──────────┘                            ▼            │
//!                    │                 ┌────────────┐    ┌──────────────┐    │
//!                    │                 │ core proxy │◀───│ prefix match │    │
//!                    │                 │ + fallback │    └──────┬───────┘    │
//!                    │                 └─────┬──────┘           │            │
//!                    └───────────────────────┼──────────────────┼────────────┘
//!                                            ▼                  ▼
//!                                      Core service     Activity backends
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use activity_gateway::config::{load_config, ProcessEnv};
use activity_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use activity_gateway::observability::{init_logging, metrics};
use activity_gateway::{GatewayError, GatewayServer};

const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

#[derive(Parser)]
#[command(name = "activity-gateway", version)]
#[command(about = "Edge gateway for an embedded Discord Activity", long_about = None)]
struct Cli {
    /// Path to the TOML config. Required to exist when given explicitly.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("activity-gateway: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), GatewayError> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&path, cli.config.is_some(), &ProcessEnv)?;

    if cli.check {
        println!("configuration OK ({})", path.display());
        return Ok(());
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "activity-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.proxy.routes.len(),
        core = config.core.is_some(),
        production = config.embedding.production,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| GatewayError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let server = GatewayServer::new(config)?;
    let listener = TcpListener::bind(&server.config().listener.bind_address).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
