//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::{extract::Path as UrlPath, http::HeaderMap, routing::get, Json, Router};
use tokio::net::TcpListener;

use txn_agent::config::{AgentConfig, AgentSettings, TlsConfig};
use txn_agent::lifecycle::Shutdown;
use txn_agent::{current_transaction, Agent, HttpServer};

/// Response header carrying the transaction name seen by the handler.
pub const TRANSACTION_HEADER: &str = "x-transaction-name";

pub fn test_agent() -> Agent {
    Agent::new(AgentSettings::default())
}

pub fn disabled_agent() -> Agent {
    Agent::new(AgentSettings {
        enabled: false,
        ..AgentSettings::default()
    })
}

pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.request_secs = 10;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Header map naming the transaction visible to the caller, or "none".
pub fn transaction_header() -> HeaderMap {
    let name = current_transaction()
        .map(|t| t.name().to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut headers = HeaderMap::new();
    headers.insert(TRANSACTION_HEADER, name.parse().unwrap());
    headers
}

async fn hello(UrlPath(name): UrlPath<String>) -> (HeaderMap, Json<String>) {
    (transaction_header(), Json(format!("hello {name}")))
}

/// The demo application: `GET /hello/{name}`.
pub fn hello_app() -> Router {
    Router::new().route("/hello/{name}", get(hello))
}

/// Serve `app` instrumented by `agent` on an ephemeral plain-HTTP port.
pub async fn spawn_server(agent: &Agent, app: Router) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&test_config(), agent, app);
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });
    (addr, shutdown)
}

/// Serve `app` over TLS with the localhost fixture certificate.
pub async fn spawn_tls_server(agent: &Agent, app: Router) -> (SocketAddr, Shutdown) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&test_config(), agent, app);
    let rx = shutdown.subscribe();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let tls = TlsConfig {
        cert_path: fixtures.join("localhost-cert.pem").display().to_string(),
        key_path: fixtures.join("localhost-key.pem").display().to_string(),
    };
    tokio::spawn(async move {
        server.run_tls(listener, &tls, rx).await.unwrap();
    });
    (addr, shutdown)
}

/// Plain-HTTP serving of an uninstrumented router.
pub async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll until `name` has at least `count` calls. Returns the final count.
///
/// A transaction is recorded when hyper finishes with the response body,
/// which can be just after the client has read it.
pub async fn wait_for_metric(agent: &Agent, name: &str, count: u64) -> u64 {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = agent
            .metrics()
            .get_metric(name)
            .map(|m| m.stats.call_count)
            .unwrap_or(0);
        if seen >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
