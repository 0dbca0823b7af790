//! Request-transaction instrumentation agent.
//!
//! Attaches to an axum router and tracks one transaction per inbound request:
//! bound while the handler runs, unbound before and after, and unbound while
//! the handler waits on outbound calls. Finished transactions feed per-name
//! statistics; attaching records which framework is serving.

pub mod agent;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod transaction;

pub use agent::{Agent, AttachError, EnvironmentRecorder, MetricsAggregator};
pub use config::AgentConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use transaction::context::current as current_transaction;
pub use transaction::Transaction;
