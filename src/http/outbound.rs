//! Outbound call interception.
//!
//! # Responsibilities
//! - Run every outbound call with no transaction bound
//! - Restore the serving transaction once the call returns
//! - Account the call's wall time as external time on the serving transaction
//!
//! # Design Decisions
//! - The call's own execution never sees the inbound request's transaction,
//!   so nothing it does is attributed to that request
//! - Only the elapsed time crosses over, and only to shrink exclusive time
//! - Concurrent calls share one busy interval; a cancelled call still closes
//!   its interval when dropped

use std::future::Future;

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::transaction::context;

/// Default cap when buffering outbound response bodies.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(#[from] axum::http::Error),
    #[error("outbound request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read outbound response body: {0}")]
    Body(#[from] axum::Error),
}

/// Run an outbound future with no transaction bound.
pub async fn call<F>(fut: F) -> F::Output
where
    F: Future,
{
    let _external = context::current().map(|transaction| transaction.begin_external());
    context::detached(fut).await
}

/// HTTP client whose calls run outside the serving transaction.
#[derive(Clone)]
pub struct OutboundClient {
    client: Client<HttpConnector, Body>,
}

impl OutboundClient {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Send a request and return the streaming response.
    pub async fn request(&self, request: Request<Body>) -> Result<Response<Incoming>, OutboundError> {
        tracing::trace!(uri = %request.uri(), method = %request.method(), "Outbound request");
        let response = call(self.client.request(request)).await?;
        Ok(response)
    }

    /// GET `uri` and buffer the response body.
    pub async fn get(&self, uri: &str) -> Result<(StatusCode, Bytes), OutboundError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::USER_AGENT, concat!("txn-agent/", env!("CARGO_PKG_VERSION")))
            .body(Body::empty())?;

        let client = self.client.clone();
        call(async move {
            let response = client.request(request).await?;
            let status = response.status();
            let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_BODY_BYTES).await?;
            Ok::<_, OutboundError>((status, body))
        })
        .await
    }
}

impl Default for OutboundClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Transaction, TransactionState};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_call_runs_detached() {
        let tx = Arc::new(Transaction::new(Method::GET, "/relay"));
        let id = tx.id();
        let (inside, after) = context::run_with(tx.clone(), async move {
            let inside = call(async { context::current().is_none() }).await;
            (inside, context::current().map(|t| t.id()))
        })
        .await;
        assert!(inside);
        assert_eq!(after, Some(id));
    }

    #[tokio::test]
    async fn test_call_accounts_external_time() {
        let tx = Arc::new(Transaction::new(Method::GET, "/relay"));
        context::run_with(tx.clone(), async {
            call(tokio::time::sleep(Duration::from_millis(10))).await;
        })
        .await;
        assert!(tx.external_time() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_concurrent_calls_keep_handler_time_exclusive() {
        let tx = Arc::new(Transaction::new(Method::GET, "/fanout"));
        context::run_with(tx.clone(), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let outbound = || call(tokio::time::sleep(Duration::from_millis(50)));
            futures_util::join!(outbound(), outbound(), outbound());
        })
        .await;

        let summary = tx.finish(TransactionState::Completed).unwrap();
        assert!(tx.external_time() >= Duration::from_millis(50));
        assert!(tx.external_time() < summary.duration);
        assert!(summary.exclusive >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_cancelled_call_closes_interval() {
        let tx = Arc::new(Transaction::new(Method::GET, "/relay"));
        context::run_with(tx.clone(), async {
            let pending = call(std::future::pending::<()>());
            let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        })
        .await;

        let external = tx.external_time();
        assert!(external >= Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tx.external_time(), external);
    }

    #[tokio::test]
    async fn test_call_outside_transaction() {
        assert_eq!(call(async { 7 }).await, 7);
    }

    #[tokio::test]
    async fn test_get_reports_connection_errors() {
        let client = OutboundClient::new();
        // Port 9 (discard) on loopback is not expected to accept connections.
        let result = client.get("http://127.0.0.1:9/").await;
        assert!(matches!(result, Err(OutboundError::Request(_))));
    }
}
