//! Transaction subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (verb, path, x-request-id)
//!     → naming.rs (normalize path → WebTransaction/Uri/<path>)
//!     → types.rs (Transaction created in Pending state)
//!     → context.rs (bound to the request's logical flow)
//!     → handler code reads context::current()
//!     → types.rs (finish: Pending → Completed | Errored, exactly once)
//!     → TransactionSummary handed to the metrics aggregator
//! ```
//!
//! # Design Decisions
//! - The active transaction lives in task-local storage, never in globals
//! - Handlers only read the transaction; the dispatch layer owns its lifecycle
//! - Finalization produces a by-value summary so nothing outlives the request

pub mod context;
pub mod naming;
pub mod types;

pub use types::{Transaction, TransactionId, TransactionState, TransactionSummary};
