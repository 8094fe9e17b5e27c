//! `mcp-gateway`: serve the MCP gateway.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gateway_server::config::GatewayConfig;
use gateway_server::http;
use gateway_server::repository::Repositories;
use gateway_server::Gateway;

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(about = "Multi-transport gateway for MCP backend servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default if no subcommand is provided)
    Serve {
        /// Configuration file (.json, .yaml, or .toml)
        #[arg(short, long)]
        config: Option<String>,

        /// Listen address, overriding the configured one
        #[arg(short, long)]
        bind: Option<String>,

        /// Log filter, e.g. "info" or "gateway_server=debug"
        #[arg(long, default_value = "info")]
        log_filter: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config_path, bind, log_filter) = match cli.command {
        Some(Commands::Serve {
            config,
            bind,
            log_filter,
        }) => (config, bind, log_filter),
        None => (None, None, "info".to_string()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)),
        )
        .init();

    let mut config = match config_path {
        Some(path) => GatewayConfig::load(&path).context("loading configuration")?,
        None => GatewayConfig::from_env().context("reading configuration from environment")?,
    };
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    let bind_addr = config.bind_addr.clone();
    let gateway = Gateway::build(config, Repositories::in_memory())
        .await
        .context("building gateway")?;
    let router = http::build_router(gateway.state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
