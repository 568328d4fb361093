use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{dp::validate_epsilon, types::Predicate};

pub const DEFAULT_TOTAL_BUDGET: f64 = 10.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BudgetError {
    #[error("privacy budget exhausted for {requester}: {remaining} remaining, {requested} requested")]
    Exhausted {
        requester: String,
        remaining: f64,
        requested: f64,
    },
    #[error("no budget entry for requester {0}")]
    UnknownRequester(String),
    #[error("total budget must be a finite value > 0, got {0}")]
    InvalidTotal(f64),
    #[error("epsilon must be a finite value > 0, got {0}")]
    InvalidEpsilon(f64),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BudgetConfig {
    /// Cap assigned to a requester the first time it is seen.
    #[serde(default = "default_total_budget")]
    pub default_total_budget: f64,
}

fn default_total_budget() -> f64 {
    DEFAULT_TOTAL_BUDGET
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_total_budget: DEFAULT_TOTAL_BUDGET,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), BudgetError> {
        let total = self.default_total_budget;
        if total.is_finite() && total > 0.0 {
            Ok(())
        } else {
            Err(BudgetError::InvalidTotal(total))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub epsilon: f64,
    pub predicate: Predicate,
    pub timestamp_ms: u64,
}

/// Per-requester state. `spent` stays within `[0, total_budget]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetEntry {
    pub total_budget: f64,
    pub spent: f64,
    pub history: Vec<HistoryEntry>,
}

impl BudgetEntry {
    pub fn new(total_budget: f64) -> Self {
        Self {
            total_budget,
            spent: 0.0,
            history: Vec::new(),
        }
    }

    pub fn can_run(&self, epsilon: f64) -> bool {
        validate_epsilon(epsilon).is_ok() && self.spent + epsilon <= self.total_budget
    }

    pub fn remaining(&self) -> f64 {
        (self.total_budget - self.spent).max(0.0)
    }
}

/// Budget-inspection view returned to callers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BudgetReport {
    pub remaining: f64,
    pub history: Vec<HistoryEntry>,
}

/// Ledger operations the query engine depends on. The in-memory
/// [`PrivacyBudgetLedger`] loses its state on restart; a durable store can be
/// substituted by implementing this trait.
pub trait BudgetStore: Send + Sync {
    /// Returns the entry, creating it with the default total on first sight.
    /// This is the only operation that creates entries.
    fn get_or_create(&self, requester: &str) -> BudgetEntry;

    fn can_run(&self, requester: &str, epsilon: f64) -> bool;

    /// Re-checks `can_run` and commits `epsilon` in one critical section.
    fn record(&self, requester: &str, epsilon: f64, predicate: Predicate)
        -> Result<(), BudgetError>;

    fn remaining(&self, requester: &str) -> f64;

    fn history(&self, requester: &str) -> Vec<HistoryEntry>;

    fn report(&self, requester: &str) -> BudgetReport {
        BudgetReport {
            remaining: self.remaining(requester),
            history: self.history(requester),
        }
    }
}

/// In-memory ledger. Each requester's entry is guarded by its map shard, so
/// the check-then-spend in [`BudgetStore::record`] is atomic per requester
/// while different requesters proceed in parallel.
#[derive(Debug)]
pub struct PrivacyBudgetLedger {
    config: BudgetConfig,
    entries: DashMap<String, BudgetEntry>,
}

impl PrivacyBudgetLedger {
    pub fn new(config: BudgetConfig) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self {
            config,
            entries: DashMap::new(),
        })
    }

    pub fn default_total(&self) -> f64 {
        self.config.default_total_budget
    }

    pub fn requesters(&self) -> usize {
        self.entries.len()
    }
}

impl Default for PrivacyBudgetLedger {
    fn default() -> Self {
        Self {
            config: BudgetConfig::default(),
            entries: DashMap::new(),
        }
    }
}

impl BudgetStore for PrivacyBudgetLedger {
    fn get_or_create(&self, requester: &str) -> BudgetEntry {
        self.entries
            .entry(requester.to_owned())
            .or_insert_with(|| BudgetEntry::new(self.config.default_total_budget))
            .value()
            .clone()
    }

    fn can_run(&self, requester: &str, epsilon: f64) -> bool {
        if validate_epsilon(epsilon).is_err() {
            return false;
        }
        match self.entries.get(requester) {
            Some(entry) => entry.can_run(epsilon),
            None => epsilon <= self.config.default_total_budget,
        }
    }

    fn record(
        &self,
        requester: &str,
        epsilon: f64,
        predicate: Predicate,
    ) -> Result<(), BudgetError> {
        if validate_epsilon(epsilon).is_err() {
            return Err(BudgetError::InvalidEpsilon(epsilon));
        }
        let mut entry = match self.entries.entry(requester.to_owned()) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => return Err(BudgetError::UnknownRequester(requester.to_owned())),
        };
        let state = entry.get_mut();
        if !state.can_run(epsilon) {
            return Err(BudgetError::Exhausted {
                requester: requester.to_owned(),
                remaining: state.remaining(),
                requested: epsilon,
            });
        }
        state.spent += epsilon;
        state.history.push(HistoryEntry {
            epsilon,
            predicate,
            timestamp_ms: now_ms(),
        });
        Ok(())
    }

    fn remaining(&self, requester: &str) -> f64 {
        self.entries
            .get(requester)
            .map(|entry| entry.remaining())
            .unwrap_or(self.config.default_total_budget)
    }

    fn history(&self, requester: &str) -> Vec<HistoryEntry> {
        self.entries
            .get(requester)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
