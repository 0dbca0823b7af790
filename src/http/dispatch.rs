//! Request dispatch instrumentation.
//!
//! # Responsibilities
//! - Create a transaction before the route handler runs and bind it
//! - Keep the binding in place until the response body has been sent
//! - Finalize the transaction exactly once and record it
//! - Leave the framework's request/response behavior untouched
//!
//! # Data Flow
//! ```text
//! Request
//!     → dispatch() middleware: Transaction::new, context::run_with
//!     → next.run(request) (route handler, unchanged)
//!     → Response: body wrapped in CompletionBody
//!     → hyper polls the body (binding re-installed on every poll)
//!     → end of stream / drop → CompletionGuard → aggregator
//! ```
//!
//! # Design Decisions
//! - Registered as ordinary axum middleware through [`Dispatcher::attach`]
//! - A request that already runs inside a transaction (nested instrumented
//!   routers) passes through untouched
//! - Handler panics finalize the transaction as errored, then keep unwinding
//! - Dropping the response or its body before the end counts as an abort,
//!   except for HEAD, which finishes by status once the handler returns

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use futures_util::FutureExt;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::agent::MetricsAggregator;
use crate::http::X_REQUEST_ID;
use crate::transaction::{context, Transaction, TransactionState};

/// A request pipeline the dispatch shim can be attached to.
pub trait Dispatcher: Sized {
    /// Name recorded under the `Dispatcher` environment key.
    const DISPATCHER: &'static str;
    /// Name recorded under the `Framework` environment key.
    const FRAMEWORK: &'static str;

    /// Register the shim in front of every route.
    fn attach(self, shim: DispatchShim) -> Self;
}

impl<S> Dispatcher for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    const DISPATCHER: &'static str = "axum";
    const FRAMEWORK: &'static str = "axum";

    fn attach(self, shim: DispatchShim) -> Self {
        self.layer(middleware::from_fn_with_state(shim, dispatch))
    }
}

/// Creates and finalizes a transaction around each request.
#[derive(Debug, Clone)]
pub struct DispatchShim {
    metrics: Arc<MetricsAggregator>,
}

impl DispatchShim {
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self { metrics }
    }

    /// Start a transaction for `request`.
    pub fn begin<B>(&self, request: &axum::http::Request<B>) -> Transaction {
        let transaction = Transaction::new(request.method().clone(), request.uri().path());
        match request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
        {
            Some(request_id) => transaction.with_request_id(request_id),
            None => transaction,
        }
    }

    fn guard(&self, transaction: Arc<Transaction>) -> CompletionGuard {
        CompletionGuard {
            transaction: Some(transaction),
            metrics: self.metrics.clone(),
        }
    }
}

async fn dispatch(State(shim): State<DispatchShim>, request: Request, next: Next) -> Response {
    if context::current().is_some() {
        return next.run(request).await;
    }

    let head = *request.method() == Method::HEAD;
    let transaction = Arc::new(shim.begin(&request));
    let mut guard = shim.guard(transaction.clone());

    tracing::trace!(
        transaction_id = %transaction.id(),
        transaction = %transaction.name(),
        method = %transaction.verb(),
        "Transaction started"
    );

    let handled = context::run_with(
        transaction.clone(),
        AssertUnwindSafe(next.run(request)).catch_unwind(),
    )
    .await;

    match handled {
        Ok(response) => {
            transaction.set_status_code(response.status().as_u16());
            if head {
                // The router discards the body of a HEAD response unread.
                guard.complete();
                return response;
            }
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(CompletionBody { inner: body, guard }))
        }
        Err(panic) => {
            tracing::error!(transaction_id = %transaction.id(), "Handler panicked");
            guard.finish(TransactionState::Errored);
            std::panic::resume_unwind(panic)
        }
    }
}

/// Finalizes a transaction once, on request or on drop.
#[derive(Debug)]
struct CompletionGuard {
    transaction: Option<Arc<Transaction>>,
    metrics: Arc<MetricsAggregator>,
}

impl CompletionGuard {
    fn transaction(&self) -> Option<Arc<Transaction>> {
        self.transaction.clone()
    }

    /// Finish according to the response status.
    fn complete(&mut self) {
        let state = TransactionState::for_status(
            self.transaction.as_ref().and_then(|t| t.status_code()),
        );
        self.finish(state);
    }

    fn finish(&mut self, state: TransactionState) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        if let Some(summary) = transaction.finish(state) {
            self.metrics.merge(&summary);
            tracing::debug!(
                transaction_id = %summary.id,
                transaction = %summary.name,
                state = summary.state.as_str(),
                status = ?summary.status_code,
                duration_ms = summary.duration.as_secs_f64() * 1000.0,
                "Transaction finished"
            );
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            tracing::debug!("Response abandoned before completion");
            self.finish(TransactionState::Errored);
        }
    }
}

/// Response body that keeps the transaction bound until the last frame.
struct CompletionBody {
    inner: Body,
    guard: CompletionGuard,
}

impl HttpBody for CompletionBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = &mut *self;
        let polled = match this.guard.transaction() {
            Some(transaction) => {
                context::run_with_sync(transaction, || Pin::new(&mut this.inner).poll_frame(cx))
            }
            None => Pin::new(&mut this.inner).poll_frame(cx),
        };

        match &polled {
            Poll::Ready(None) => this.guard.complete(),
            Poll::Ready(Some(Err(_))) => this.guard.finish(TransactionState::Errored),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CompletionBody {
    fn drop(&mut self) {
        // hyper may stop polling once the inner body reports end of stream.
        if self.inner.is_end_stream() {
            self.guard.complete();
        }
    }
}
