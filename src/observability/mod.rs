//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms mirrored from the aggregator)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Request ID and transaction ID flow through log fields
//! - Metric updates go through the `metrics` facade; with no exporter
//!   installed they are no-ops

pub mod logging;
pub mod metrics;
