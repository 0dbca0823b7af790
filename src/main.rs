//! Demo host for the transaction agent.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net (TCP / TLS) ─▶ http server layers ─▶ dispatch shim ─▶ /hello/{name}
//!                                                                  │
//!                                                                  ▼
//!                                                   agent: aggregator + environment
//! ```

use std::path::PathBuf;

use axum::{extract::Path, routing::get, Json, Router};
use clap::Parser;
use tokio::net::TcpListener;

use txn_agent::config::{self, AgentConfig, TlsConfig};
use txn_agent::lifecycle::{spawn_signal_listener, Shutdown};
use txn_agent::observability::{logging, metrics};
use txn_agent::{Agent, HttpServer};

/// Serve an instrumented demo application.
#[derive(Debug, Parser)]
#[command(name = "txn-agent", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// TLS certificate (PEM). Requires --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// TLS private key (PEM). Requires --tls-cert.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,
}

async fn hello(Path(name): Path<String>) -> Json<String> {
    Json(format!("hello {name}"))
}

fn app() -> Router {
    Router::new().route("/hello/{name}", get(hello))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AgentConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let (Some(cert_path), Some(key_path)) = (args.tls_cert, args.tls_key) {
        config.listener.tls = Some(TlsConfig { cert_path, key_path });
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "txn-agent starting");

    if config.observability.metrics_enabled {
        metrics::init_metrics(&config.observability.metrics_address)?;
    }

    let agent = Agent::new(config.agent.clone());
    let server = HttpServer::new(&config, &agent, app());

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    match &config.listener.tls {
        Some(tls) => {
            let listener = std::net::TcpListener::bind(&config.listener.bind_address)?;
            server.run_tls(listener, tls, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown.subscribe()).await?;
        }
    }

    tracing::info!(
        metric_names = agent.metrics().len(),
        environment = %agent.environment().to_json(),
        "Shutdown complete"
    );
    Ok(())
}
