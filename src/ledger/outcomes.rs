//! Outcome ledger.
//!
//! Write-once record of realised results per (subject, market, date).
//! A repeated write is a no-op; the first value wins.

use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::types::{HitRecord, MarketKey, Outcome, OutcomeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Inserted,
    Duplicate,
}

#[derive(Default)]
pub struct OutcomeLedger {
    outcomes: RwLock<HashMap<MarketKey, BTreeMap<NaiveDate, Outcome>>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an outcome unless one already exists for its date.
    pub fn record(&self, outcome: Outcome) -> OutcomeStatus {
        let mut outcomes = self.outcomes.write();
        let by_date = outcomes.entry(outcome.key()).or_default();

        if let Some(existing) = by_date.get(&outcome.date) {
            if existing != &outcome {
                warn!(
                    key = %outcome.key(),
                    date = %outcome.date,
                    stored = %existing.result,
                    incoming = %outcome.result,
                    "Conflicting duplicate outcome ignored"
                );
            }
            return OutcomeStatus::Duplicate;
        }

        debug!(
            key = %outcome.key(),
            date = %outcome.date,
            result = %outcome.result,
            value = outcome.realized_value,
            "Outcome recorded"
        );
        by_date.insert(outcome.date, outcome);
        OutcomeStatus::Inserted
    }

    pub fn get(&self, key: &MarketKey, date: NaiveDate) -> Option<Outcome> {
        self.outcomes.read().get(key)?.get(&date).cloned()
    }

    /// Earliest outcome for `key` dated on or after `date`.
    pub fn first_on_or_after(&self, key: &MarketKey, date: NaiveDate) -> Option<Outcome> {
        self.find_on_or_after(key, date, |_| true)
    }

    /// Earliest outcome for `key` dated on or after `date` that matches `pred`.
    pub fn find_on_or_after<F>(&self, key: &MarketKey, date: NaiveDate, pred: F) -> Option<Outcome>
    where
        F: Fn(&Outcome) -> bool,
    {
        let outcomes = self.outcomes.read();
        outcomes
            .get(key)?
            .range(date..)
            .map(|(_, o)| o)
            .find(|o| pred(o))
            .cloned()
    }

    /// Tally of wins, losses and pushes for one key.
    pub fn hit_record(&self, key: &MarketKey) -> HitRecord {
        let outcomes = self.outcomes.read();
        let mut record = HitRecord::default();
        if let Some(by_date) = outcomes.get(key) {
            for outcome in by_date.values() {
                match outcome.result {
                    OutcomeResult::Win => record.wins += 1,
                    OutcomeResult::Loss => record.losses += 1,
                    OutcomeResult::Push => record.pushes += 1,
                }
            }
        }
        record
    }

    /// Every stored outcome, ordered by key then date.
    pub fn all(&self) -> Vec<Outcome> {
        let outcomes = self.outcomes.read();
        let mut keys: Vec<&MarketKey> = outcomes.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| outcomes[k].values().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload persisted outcomes. Duplicates keep the first copy.
    pub fn restore(&self, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
