//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Attach the agent's dispatch shim to the application router
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve over plain TCP or TLS until shutdown is signalled

use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::agent::Agent;
use crate::config::{AgentConfig, TlsConfig};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::net::tls::{load_tls_config, TlsError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

/// Instrumented HTTP server.
pub struct HttpServer {
    router: Router,
    shutdown_grace: Duration,
}

impl HttpServer {
    /// Wrap `app` with the agent's instrumentation and the standard layers.
    pub fn new(config: &AgentConfig, agent: &Agent, app: Router) -> Self {
        let router = Self::build_router(config, agent, app);
        Self {
            router,
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }

    /// Build the router with all middleware layers.
    ///
    /// The dispatch shim sits innermost, so a request ID is already assigned
    /// and a timeout drops the handler future from outside the transaction.
    #[allow(deprecated)]
    fn build_router(config: &AgentConfig, agent: &Agent, app: Router) -> Router {
        agent
            .instrument(app)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plain HTTP until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "HTTP server starting");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS with the given certificate pair until `shutdown` fires.
    pub async fn run_tls(
        self,
        listener: std::net::TcpListener,
        tls: &TlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = true, "HTTP server starting");

        let handle = Handle::new();
        let signal = handle.clone();
        let grace = self.shutdown_grace;
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            signal.graceful_shutdown(Some(grace));
        });

        axum_server::from_tcp_rustls(listener, rustls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
