//! Agent subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     AgentSettings → Agent::new
//!         → environment.rs (process facts)
//!     Agent::instrument(router)
//!         → environment.rs ("Dispatcher", "Framework")
//!         → http::dispatch (shim layered onto the router)
//!
//! Per request (via the shim):
//!     finished Transaction → aggregator.rs (per-name statistics)
//! ```
//!
//! # Design Decisions
//! - The agent is the composition root: it owns the aggregator and the
//!   environment recorder and hands them to the shim explicitly
//! - Failing to attach is never fatal; the router is served uninstrumented

pub mod aggregator;
pub mod environment;

use std::sync::Arc;

use thiserror::Error;

use crate::config::AgentSettings;
use crate::http::dispatch::{DispatchShim, Dispatcher};
use crate::http::outbound::OutboundClient;
use crate::observability::metrics;

pub use aggregator::{MetricRecord, MetricsAggregator, Stats};
pub use environment::EnvironmentRecorder;

/// Environment key naming the active request dispatcher.
pub const DISPATCHER_KEY: &str = "Dispatcher";
/// Environment key naming the active web framework.
pub const FRAMEWORK_KEY: &str = "Framework";

/// Reasons instrumentation declines to attach.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("agent is disabled")]
    AgentDisabled,
    #[error("instrumentation for {0} is disabled by configuration")]
    FrameworkDisabled(&'static str),
}

/// Monitoring agent handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Agent {
    settings: Arc<AgentSettings>,
    metrics: Arc<MetricsAggregator>,
    environment: Arc<EnvironmentRecorder>,
}

impl Agent {
    pub fn new(settings: AgentSettings) -> Self {
        let environment = Arc::new(EnvironmentRecorder::new());
        if settings.enabled && settings.gather_environment {
            environment.gather_process_facts();
        }
        tracing::info!(
            app_name = %settings.app_name,
            enabled = settings.enabled,
            "Agent initialized"
        );
        let metrics = Arc::new(MetricsAggregator::with_export_limit(
            settings.max_exported_names,
        ));
        Self {
            settings: Arc::new(settings),
            metrics,
            environment,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn environment(&self) -> &EnvironmentRecorder {
        &self.environment
    }

    /// Build a dispatch shim recording into this agent's aggregator.
    pub fn dispatch_shim(&self) -> DispatchShim {
        DispatchShim::new(self.metrics.clone())
    }

    /// Client for outbound calls that never carry the serving transaction.
    pub fn outbound_client(&self) -> OutboundClient {
        OutboundClient::new()
    }

    /// Attach the dispatch shim to `target`.
    pub fn try_instrument<D: Dispatcher>(&self, target: D) -> Result<D, AttachError> {
        if !self.settings.enabled {
            return Err(AttachError::AgentDisabled);
        }
        if self
            .settings
            .disabled_instrumentation
            .iter()
            .any(|name| name.eq_ignore_ascii_case(D::FRAMEWORK))
        {
            return Err(AttachError::FrameworkDisabled(D::FRAMEWORK));
        }

        self.environment.record(DISPATCHER_KEY, D::DISPATCHER);
        self.environment.record(FRAMEWORK_KEY, D::FRAMEWORK);
        tracing::info!(
            dispatcher = D::DISPATCHER,
            framework = D::FRAMEWORK,
            "Instrumentation attached"
        );
        Ok(target.attach(self.dispatch_shim()))
    }

    /// Attach the dispatch shim, serving `target` uninstrumented on failure.
    pub fn instrument<D: Dispatcher + Clone>(&self, target: D) -> D {
        match self.try_instrument(target.clone()) {
            Ok(instrumented) => {
                metrics::record_attach(D::FRAMEWORK, true);
                instrumented
            }
            Err(e) => {
                tracing::warn!(framework = D::FRAMEWORK, error = %e, "Instrumentation not attached");
                metrics::record_attach(D::FRAMEWORK, false);
                target
            }
        }
    }
}
