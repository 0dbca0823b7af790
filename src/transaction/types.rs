//! Transaction state machine.
//!
//! # States
//! - Pending: request is being handled, transaction may be bound
//! - Completed: response finished with a non-error status
//! - Errored: 5xx status, handler panic, or response abandoned before the end
//!
//! # State Transitions
//! ```text
//! Pending → Completed: response body reached end of stream, status < 500
//! Pending → Errored:   status >= 500, handler panicked, or response dropped
//! ```
//!
//! A transaction leaves Pending exactly once. The transition is a single
//! compare-and-swap on the state byte; later finish attempts are no-ops.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use axum::http::Method;
use serde::Serialize;
use uuid::Uuid;

use crate::agent::aggregator::Stats;
use crate::transaction::naming;

/// Global counter for transaction IDs.
/// Relaxed ordering is enough, IDs only need to be unique and increasing.
static TRANSACTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Monotonically assigned transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate the next transaction ID.
    pub fn next() -> Self {
        Self(TRANSACTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Lifecycle state of a transaction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending = 0,
    Completed = 1,
    Errored = 2,
}

impl TransactionState {
    /// Terminal state for a response that finished with `status`.
    pub fn for_status(status: Option<u16>) -> Self {
        match status {
            Some(code) if code < 500 => TransactionState::Completed,
            _ => TransactionState::Errored,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != TransactionState::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Completed => "completed",
            TransactionState::Errored => "errored",
        }
    }
}

impl From<u8> for TransactionState {
    fn from(val: u8) -> Self {
        match val {
            1 => TransactionState::Completed,
            2 => TransactionState::Errored,
            _ => TransactionState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Finish {
    end_time: SystemTime,
    duration: Duration,
}

/// Wall time covered by outbound calls.
///
/// Overlapping calls form one busy interval, so the total never exceeds the
/// time that actually passed.
#[derive(Debug, Default)]
struct ExternalClock {
    in_flight: u32,
    busy_since: Option<Instant>,
    accumulated: Duration,
}

impl ExternalClock {
    fn total(&self) -> Duration {
        match self.busy_since {
            Some(since) => self.accumulated.saturating_add(since.elapsed()),
            None => self.accumulated,
        }
    }
}

/// One inbound request's unit of work.
///
/// Created by the dispatch layer and shared as `Arc<Transaction>` between the
/// flow-local binding and the completion guard. Handlers see it read-only,
/// apart from recording metrics scoped to the transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    guid: Uuid,
    name: String,
    uri: String,
    verb: Method,
    url: String,
    request_id: Option<String>,
    start_time: SystemTime,
    started_at: Instant,
    state: AtomicU8,
    finished: OnceLock<Finish>,
    /// 0 until a response status is known.
    status_code: AtomicU16,
    external: Mutex<ExternalClock>,
    scoped_metrics: Mutex<HashMap<String, Stats>>,
}

impl Transaction {
    /// Start a new pending transaction for a request.
    pub fn new(verb: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: TransactionId::next(),
            guid: Uuid::new_v4(),
            name: naming::web_transaction_name(&url),
            uri: naming::normalize_uri(&url),
            verb,
            url,
            request_id: None,
            start_time: SystemTime::now(),
            started_at: Instant::now(),
            state: AtomicU8::new(TransactionState::Pending as u8),
            finished: OnceLock::new(),
            status_code: AtomicU16::new(0),
            external: Mutex::new(ExternalClock::default()),
            scoped_metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the inbound request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    /// Metric name, e.g. `WebTransaction/Uri/hello/friend`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized route key, e.g. `hello/friend`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn verb(&self) -> &Method {
        &self.verb
    }

    /// Raw request path as received.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from(self.state.load(Ordering::Acquire))
    }

    /// True while the transaction is still pending.
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Pending
    }

    /// End timestamp, unset until finished.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.finished.get().map(|f| f.end_time)
    }

    /// Final duration, unset until finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished.get().map(|f| f.duration)
    }

    /// Final duration if finished, otherwise time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.duration().unwrap_or_else(|| self.started_at.elapsed())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.status_code.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    pub fn set_status_code(&self, code: u16) {
        self.status_code.store(code, Ordering::Release);
    }

    fn external_clock(&self) -> std::sync::MutexGuard<'_, ExternalClock> {
        self.external.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a measured span of outbound time directly.
    pub fn add_external_time(&self, elapsed: Duration) {
        let mut clock = self.external_clock();
        clock.accumulated = clock.accumulated.saturating_add(elapsed);
    }

    /// Mark the start of an outbound call. The call ends when the guard drops.
    pub fn begin_external(self: &Arc<Self>) -> ExternalGuard {
        let mut clock = self.external_clock();
        if clock.in_flight == 0 {
            clock.busy_since = Some(Instant::now());
        }
        clock.in_flight += 1;
        ExternalGuard {
            transaction: Arc::clone(self),
        }
    }

    fn end_external(&self) {
        let mut clock = self.external_clock();
        clock.in_flight = clock.in_flight.saturating_sub(1);
        if clock.in_flight == 0 {
            if let Some(since) = clock.busy_since.take() {
                clock.accumulated = clock.accumulated.saturating_add(since.elapsed());
            }
        }
    }

    /// Outbound time so far, counting overlapping calls once.
    pub fn external_time(&self) -> Duration {
        self.external_clock().total()
    }

    /// Record a metric scoped to this transaction.
    ///
    /// Returns false once the transaction has finished; late observations are
    /// dropped rather than attributed to a completed request.
    pub fn record_metric(&self, name: impl Into<String>, elapsed: Duration) -> bool {
        let mut metrics = self
            .scoped_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // `finish` swaps the state under this lock.
        if !self.is_active() {
            return false;
        }
        metrics.entry(name.into()).or_default().record(elapsed);
        true
    }

    /// Statistics for a scoped metric recorded so far.
    pub fn scoped_metric(&self, name: &str) -> Option<Stats> {
        self.scoped_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Move the transaction into a terminal state.
    ///
    /// Only the first call with a terminal `state` wins and gets the summary;
    /// every other call returns `None`.
    pub fn finish(&self, state: TransactionState) -> Option<TransactionSummary> {
        if !state.is_terminal() {
            return None;
        }
        let mut scoped = self
            .scoped_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.state
            .compare_exchange(
                TransactionState::Pending as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        let duration = self.started_at.elapsed();
        let finish = *self.finished.get_or_init(|| Finish {
            end_time: SystemTime::now(),
            duration,
        });

        let mut metrics: Vec<(String, Stats)> = std::mem::take(&mut *scoped).into_iter().collect();
        drop(scoped);
        metrics.sort_by(|a, b| a.0.cmp(&b.0));

        Some(TransactionSummary {
            id: self.id,
            name: self.name.clone(),
            state,
            status_code: self.status_code(),
            duration: finish.duration,
            exclusive: finish.duration.saturating_sub(self.external_time()),
            metrics,
        })
    }
}

/// An outbound call in progress on a transaction.
#[derive(Debug)]
pub struct ExternalGuard {
    transaction: Arc<Transaction>,
}

impl Drop for ExternalGuard {
    fn drop(&mut self) {
        self.transaction.end_external();
    }
}

/// By-value record of a finished transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub name: String,
    pub state: TransactionState,
    pub status_code: Option<u16>,
    pub duration: Duration,
    /// Duration minus time spent in outbound calls.
    pub exclusive: Duration,
    /// Metrics recorded by handler code, sorted by name.
    pub metrics: Vec<(String, Stats)>,
}
