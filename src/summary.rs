//! Result aggregation.

use crate::test::{Outcome, TestResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe collection of finished tests.
#[derive(Debug)]
pub struct Summary {
    results: Mutex<Vec<TestResult>>,
    started: Instant,
}

/// Point-in-time copy of a [`Summary`].
#[derive(Debug, Clone, Serialize)]
pub struct SummarySnapshot {
    /// Number of results per outcome; every outcome is present.
    pub counts: BTreeMap<Outcome, usize>,
    pub total: usize,
    #[serde(serialize_with = "crate::test::serialize_duration")]
    pub elapsed: Duration,
    /// Sorted by path, then name.
    pub results: Vec<TestResult>,
}

impl Summary {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn record(&self, result: TestResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        let mut results = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        results.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.name.cmp(&b.name)));

        let mut counts: BTreeMap<Outcome, usize> =
            Outcome::ALL.into_iter().map(|o| (o, 0)).collect();
        for result in &results {
            *counts.entry(result.outcome).or_default() += 1;
        }

        SummarySnapshot {
            counts,
            total: results.len(),
            elapsed: self.started.elapsed(),
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.outcome.is_failure())
    }
}

impl Default for Summary {
    fn default() -> Self {
        Self::new()
    }
}

impl SummarySnapshot {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    pub fn has_failures(&self) -> bool {
        self.count(Outcome::Fail) + self.count(Outcome::TimedOut) > 0
    }
}
