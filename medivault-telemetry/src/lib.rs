//! In-process telemetry facade for the medivault query engine. Counters and
//! latency samples are kept in memory so tests can assert instrumentation and
//! the CLI can print a summary without shipping anything to an exporter.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for medivault-telemetry."
);

#[cfg(feature = "dev")]
const DEFAULT_FLUSH_MS: u64 = 1_000;
#[cfg(feature = "test")]
const DEFAULT_FLUSH_MS: u64 = 500;
#[cfg(any(feature = "prod", not(any(feature = "dev", feature = "test"))))]
const DEFAULT_FLUSH_MS: u64 = 5_000;

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_MS
}

fn default_component() -> String {
    "medivault".into()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    /// Component label stamped on every snapshot.
    #[serde(default = "default_component")]
    pub component: String,
    /// Flush cadence in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Extra labels appended to every snapshot.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            component: default_component(),
            flush_interval_ms: default_flush_interval_ms(),
            labels: BTreeMap::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn sample(component: &str) -> Self {
        Self {
            component: component.to_owned(),
            flush_interval_ms: default_flush_interval_ms(),
            labels: BTreeMap::from([("deployment".into(), "local".into())]),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("counter overflow for metric {0}")]
    CounterOverflow(String),
    #[error("failed to render snapshot: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp_ms: u64,
    pub component: String,
    pub labels: BTreeMap<String, String>,
    pub counters: BTreeMap<String, u64>,
    pub latencies_ms: BTreeMap<String, Vec<u64>>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Default)]
struct TelemetryState {
    counters: BTreeMap<String, u64>,
    latencies_ms: BTreeMap<String, Vec<u64>>,
}

/// Cloneable handle; clones share the same counters.
#[derive(Clone)]
pub struct TelemetryHandle {
    config: TelemetryConfig,
    state: Arc<Mutex<TelemetryState>>,
}

impl TelemetryHandle {
    pub fn from_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TelemetryState::default())),
        }
    }

    pub fn record_counter(&self, name: &str, delta: u64) -> Result<(), TelemetryError> {
        let mut guard = self.state.lock();
        let entry = guard.counters.entry(name.to_owned()).or_default();
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| TelemetryError::CounterOverflow(name.to_owned()))?;
        Ok(())
    }

    /// Saturating variant for hot paths where an overflow must not fail the caller.
    pub fn incr(&self, name: &str) {
        let mut guard = self.state.lock();
        let entry = guard.counters.entry(name.to_owned()).or_default();
        *entry = entry.saturating_add(1);
    }

    pub fn record_latency_ms(&self, name: &str, value: u64) {
        let mut guard = self.state.lock();
        guard
            .latencies_ms
            .entry(name.to_owned())
            .or_default()
            .push(value);
    }

    /// Reads the current state without clearing it.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let guard = self.state.lock();
        self.build_snapshot(&guard)
    }

    pub fn flush(&self) -> TelemetrySnapshot {
        let mut guard = self.state.lock();
        let snapshot = self.build_snapshot(&guard);
        guard.counters.clear();
        guard.latencies_ms.clear();
        snapshot
    }

    pub fn flush_interval(&self) -> u64 {
        self.config.flush_interval_ms
    }

    fn build_snapshot(&self, state: &TelemetryState) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp_ms: now_ms(),
            component: self.config.component.clone(),
            labels: self.config.labels.clone(),
            counters: state.counters.clone(),
            latencies_ms: state.latencies_ms.clone(),
        }
    }
}

impl Default for TelemetryHandle {
    fn default() -> Self {
        Self::from_config(TelemetryConfig::default())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> TelemetryHandle {
        TelemetryHandle::from_config(TelemetryConfig::sample("matcher"))
    }

    #[test]
    fn records_counters_and_latencies() {
        let handle = handle();
        handle.record_counter("query.executed", 1).unwrap();
        handle.record_counter("query.executed", 2).unwrap();
        handle.incr("matcher.records.excluded");
        handle.record_latency_ms("query.latency", 42);
        let snapshot = handle.flush();
        assert_eq!(snapshot.counters["query.executed"], 3);
        assert_eq!(snapshot.counter("matcher.records.excluded"), 1);
        assert_eq!(snapshot.latencies_ms["query.latency"], vec![42]);
        assert_eq!(snapshot.component, "matcher");
    }

    #[test]
    fn detects_counter_overflow() {
        let handle = handle();
        handle.record_counter("query.executed", u64::MAX).unwrap();
        let err = handle.record_counter("query.executed", 1).unwrap_err();
        assert!(matches!(err, TelemetryError::CounterOverflow(_)));
        handle.incr("query.executed");
        assert_eq!(handle.snapshot().counter("query.executed"), u64::MAX);
    }

    #[test]
    fn snapshot_keeps_state_and_flush_clears_it() {
        let handle = handle();
        handle.incr("query.requests");
        assert_eq!(handle.snapshot().counter("query.requests"), 1);
        assert_eq!(handle.snapshot().counter("query.requests"), 1);
        handle.flush();
        let second = handle.flush();
        assert!(second.counters.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let handle = handle();
        let clone = handle.clone();
        clone.incr("query.failed");
        assert_eq!(handle.snapshot().counter("query.failed"), 1);
        assert!(handle.snapshot().to_json().unwrap().contains("query.failed"));
    }
}
