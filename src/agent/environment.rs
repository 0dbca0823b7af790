//! Registry of detected runtime facts.
//!
//! Entries such as `("Dispatcher", "axum")` are recorded when instrumentation
//! is attached, never per request. Each distinct pair is kept once, in the
//! order it was first recorded.

use std::sync::{PoisonError, RwLock};

use serde_json::Value;

#[derive(Debug, Default)]
pub struct EnvironmentRecorder {
    entries: RwLock<Vec<(String, String)>>,
}

impl EnvironmentRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Returns false if the exact pair was already present.
    pub fn record(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let (key, value) = (key.into(), value.into());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|(k, v)| *k == key && *v == value) {
            return false;
        }
        tracing::debug!(key = %key, value = %value, "Environment fact recorded");
        entries.push((key, value));
        true
    }

    /// Snapshot of every entry in recording order.
    pub fn to_list(&self) -> Vec<(String, String)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries as a JSON array of `[key, value]` pairs.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.to_list()
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), Value::String(v)]))
                .collect(),
        )
    }

    /// Every value recorded under `key`.
    pub fn get(&self, key: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(k, v)| k == key && v == value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record facts about the host process.
    pub fn gather_process_facts(&self) {
        self.record("Operating System", std::env::consts::OS);
        self.record("Architecture", std::env::consts::ARCH);
        if let Ok(cpus) = std::thread::available_parallelism() {
            self.record("Processors", cpus.to_string());
        }
        self.record("Agent Version", env!("CARGO_PKG_VERSION"));
    }
}
