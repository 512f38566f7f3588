//! Per-backend cache operation counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters for one backend since the orchestrator was built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    /// Lookups answered with a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable (absent, expired or corrupt).
    pub misses: u64,
    /// Successful writes, mirror writes included.
    pub stores: u64,
    /// Reads or writes that failed or timed out.
    pub errors: u64,
}

impl BackendStats {
    /// Share of lookups that were hits, or `0.0` before any lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Outcome of one backend operation, as counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Hit,
    Miss,
    Stored,
    Error,
}

/// Thread-safe counters keyed by backend name.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    backends: Mutex<BTreeMap<String, BackendStats>>,
}

impl CacheStats {
    pub(crate) fn register(&self, name: &str) {
        self.backends.lock().entry(name.to_string()).or_default();
    }

    pub(crate) fn record(&self, name: &str, outcome: Outcome) {
        let mut backends = self.backends.lock();
        let stats = backends.entry(name.to_string()).or_default();
        match outcome {
            Outcome::Hit => stats.hits += 1,
            Outcome::Miss => stats.misses += 1,
            Outcome::Stored => stats.stores += 1,
            Outcome::Error => stats.errors += 1,
        }
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, BackendStats> {
        self.backends.lock().clone()
    }

    pub(crate) fn reset(&self) {
        for stats in self.backends.lock().values_mut() {
            *stats = BackendStats::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let stats = CacheStats::default();
        stats.register("file");
        stats.record("memory", Outcome::Hit);
        stats.record("memory", Outcome::Miss);
        stats.record("memory", Outcome::Miss);
        stats.record("memory", Outcome::Stored);
        stats.record("memory", Outcome::Error);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot["file"], BackendStats::default());
        assert_eq!(
            snapshot["memory"],
            BackendStats { hits: 1, misses: 2, stores: 1, errors: 1 }
        );
        assert!((snapshot["memory"].hit_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(snapshot["file"].hit_ratio(), 0.0);

        stats.reset();
        assert_eq!(stats.snapshot()["memory"], BackendStats::default());
    }
}
