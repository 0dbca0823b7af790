//! Per-name call counts and timing statistics.
//!
//! # Responsibilities
//! - Accumulate statistics for every finished transaction, keyed by name
//! - Fold transaction-scoped metrics into the process-wide view
//! - Serve read access for verification and reporting
//!
//! # Design Decisions
//! - DashMap gives per-key locking, so concurrent requests for the same name
//!   never lose an update and requests for different names do not contend
//! - Unknown names are created on first observation; there is no expiry
//! - Every update is mirrored to the `metrics` facade for the exporter. Only
//!   the first `export_limit` distinct names get their own label; later names
//!   share [`OVERFLOW_LABEL`] so path scans cannot grow the exporter unbounded

use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;

use crate::observability::metrics;
use crate::transaction::{TransactionState, TransactionSummary};

/// Timing statistics for one metric name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub call_count: u64,
    pub total: Duration,
    pub total_exclusive: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Sum of squared durations, in seconds².
    pub sum_of_squares: f64,
}

impl Stats {
    /// Record one call whose exclusive time equals its total time.
    pub fn record(&mut self, elapsed: Duration) {
        self.record_with_exclusive(elapsed, elapsed);
    }

    /// Record one call.
    pub fn record_with_exclusive(&mut self, elapsed: Duration, exclusive: Duration) {
        if self.call_count == 0 || elapsed < self.min {
            self.min = elapsed;
        }
        if elapsed > self.max {
            self.max = elapsed;
        }
        self.call_count += 1;
        self.total = self.total.saturating_add(elapsed);
        self.total_exclusive = self.total_exclusive.saturating_add(exclusive);
        let secs = elapsed.as_secs_f64();
        self.sum_of_squares += secs * secs;
    }

    /// Fold another set of statistics into this one.
    pub fn merge(&mut self, other: &Stats) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 || other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.call_count += other.call_count;
        self.total = self.total.saturating_add(other.total);
        self.total_exclusive = self.total_exclusive.saturating_add(other.total_exclusive);
        self.sum_of_squares += other.sum_of_squares;
    }

    /// Mean call duration, if any calls were recorded.
    pub fn mean(&self) -> Option<Duration> {
        u32::try_from(self.call_count)
            .ok()
            .filter(|count| *count > 0)
            .map(|count| self.total / count)
    }
}

/// A named metric and its statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub stats: Stats,
}

/// Exporter label shared by names beyond the export limit.
pub const OVERFLOW_LABEL: &str = "__other__";

/// Default number of distinct names exported with their own label.
pub const DEFAULT_EXPORT_LIMIT: usize = 1000;

/// Process-wide accumulator of transaction metrics.
#[derive(Debug)]
pub struct MetricsAggregator {
    metrics: DashMap<String, Stats>,
    /// Errored transactions per transaction name.
    errors: DashMap<String, u64>,
    /// Names that own an exporter label.
    exported: DashSet<String>,
    export_limit: usize,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_export_limit(DEFAULT_EXPORT_LIMIT)
    }

    pub fn with_export_limit(export_limit: usize) -> Self {
        Self {
            metrics: DashMap::new(),
            errors: DashMap::new(),
            exported: DashSet::new(),
            export_limit,
        }
    }

    /// Label under which `name` is mirrored to the exporter.
    pub fn export_label<'a>(&self, name: &'a str) -> &'a str {
        if self.exported.contains(name) {
            return name;
        }
        if self.exported.len() < self.export_limit {
            self.exported.insert(name.to_string());
            return name;
        }
        OVERFLOW_LABEL
    }

    /// Record one call for `name`.
    pub fn record(&self, name: &str, elapsed: Duration) {
        self.record_with_exclusive(name, elapsed, elapsed);
    }

    /// Record one call for `name` with a separate exclusive time.
    pub fn record_with_exclusive(&self, name: &str, elapsed: Duration, exclusive: Duration) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .record_with_exclusive(elapsed, exclusive);
        metrics::record_metric(self.export_label(name), elapsed);
    }

    /// Fold a finished transaction into the aggregate.
    ///
    /// The transaction's own name gets exactly one call, recorded last so a
    /// reader that sees the call also sees its error count and scoped metrics.
    pub fn merge(&self, summary: &TransactionSummary) {
        if summary.state == TransactionState::Errored {
            *self.errors.entry(summary.name.clone()).or_default() += 1;
        }
        for (name, stats) in &summary.metrics {
            self.metrics.entry(name.clone()).or_default().merge(stats);
        }
        self.record_with_exclusive(&summary.name, summary.duration, summary.exclusive);
        metrics::record_transaction(summary.state, summary.duration);
    }

    pub fn get_metric(&self, name: &str) -> Option<MetricRecord> {
        self.metrics.get(name).map(|entry| MetricRecord {
            name: entry.key().clone(),
            stats: *entry.value(),
        })
    }

    /// Errored transactions recorded for a transaction name.
    pub fn error_count(&self, name: &str) -> u64 {
        self.errors.get(name).map(|e| *e.value()).unwrap_or(0)
    }

    /// All metrics, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricRecord> {
        let mut records: Vec<MetricRecord> = self
            .metrics
            .iter()
            .map(|entry| MetricRecord {
                name: entry.key().clone(),
                stats: *entry.value(),
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn reset(&self) {
        self.metrics.clear();
        self.errors.clear();
        self.exported.clear();
    }
}
