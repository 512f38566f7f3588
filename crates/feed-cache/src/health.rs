//! Backend health tracking.
//!
//! Health is derived from the outcome of the most recent operations against each
//! backend:
//!
//! - `Healthy` - last operation succeeded
//! - `Degraded` - recent failures, still tried
//! - `Unavailable` - `unavailable_after` consecutive failures or a failed probe;
//!   skipped until `retry_after` has elapsed since the last probe, then tried
//!   once more (half-open)
//!
//! FILE backends are never skipped. State lives in memory only.

use chrono::{DateTime, TimeDelta, Utc};
use feed_core::BackendKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default consecutive failures before a backend is marked unavailable.
pub const DEFAULT_UNAVAILABLE_AFTER: u32 = 3;

/// Default time after which an unavailable backend is retried.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Health of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Last operation succeeded.
    Healthy,
    /// Recent failures, still in rotation.
    Degraded,
    /// Skipped until the retry window elapses.
    Unavailable,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded => f.write_str("degraded"),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Snapshot of one backend's health state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Backend name.
    pub name: String,
    /// Storage technology.
    pub kind: BackendKind,
    /// Current health.
    pub health: Health,
    /// Time of the last operation or probe.
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last successful operation.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl BackendDescriptor {
    fn new(name: String, kind: BackendKind) -> Self {
        Self {
            name,
            kind,
            health: Health::Healthy,
            last_probe_at: None,
            consecutive_failures: 0,
            last_success_at: None,
        }
    }
}

/// Thresholds for health transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive failures before a backend becomes unavailable.
    pub unavailable_after: u32,
    /// Time since the last probe after which an unavailable backend is retried.
    pub retry_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unavailable_after: DEFAULT_UNAVAILABLE_AFTER,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

/// Tracks health of every registered backend.
///
/// Safe to share between concurrent callers; all state sits behind one mutex
/// and no lock is held across an await point.
#[derive(Debug, Default)]
pub struct BackendHealthMonitor {
    config: HealthConfig,
    // Registration order is the tie-breaker within a kind.
    backends: Mutex<Vec<BackendDescriptor>>,
}

impl BackendHealthMonitor {
    /// Create a monitor with the given thresholds.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            backends: Mutex::new(Vec::new()),
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub const fn config(&self) -> HealthConfig {
        self.config
    }

    /// Register a backend as healthy. Re-registering an existing name updates its kind.
    pub fn register(&self, name: impl Into<String>, kind: BackendKind) {
        let name = name.into();
        let mut backends = self.backends.lock();
        match backends.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.kind = kind,
            None => backends.push(BackendDescriptor::new(name, kind)),
        }
    }

    /// Record the outcome of an operation. Unknown names are ignored.
    pub fn report_outcome(&self, name: &str, success: bool) {
        let now = Utc::now();
        let mut backends = self.backends.lock();
        let Some(backend) = backends.iter_mut().find(|b| b.name == name) else {
            return;
        };
        let previous = backend.health;
        backend.last_probe_at = Some(now);

        if success {
            backend.consecutive_failures = 0;
            backend.last_success_at = Some(now);
            backend.health = Health::Healthy;
        } else {
            backend.consecutive_failures = backend.consecutive_failures.saturating_add(1);
            backend.health = if backend.consecutive_failures >= self.config.unavailable_after {
                Health::Unavailable
            } else {
                Health::Degraded
            };
        }

        if backend.health != previous {
            log_transition(backend, previous);
        }
    }

    /// Mark a backend unavailable immediately (failed probe).
    pub fn mark_unavailable(&self, name: &str) {
        let mut backends = self.backends.lock();
        let Some(backend) = backends.iter_mut().find(|b| b.name == name) else {
            return;
        };
        let previous = backend.health;
        backend.last_probe_at = Some(Utc::now());
        backend.consecutive_failures = backend
            .consecutive_failures
            .max(self.config.unavailable_after);
        backend.health = Health::Unavailable;
        if previous != Health::Unavailable {
            log_transition(backend, previous);
        }
    }

    /// Current health of a backend. Unknown names are unavailable.
    #[must_use]
    pub fn status(&self, name: &str) -> Health {
        self.backends
            .lock()
            .iter()
            .find(|b| b.name == name)
            .map_or(Health::Unavailable, |b| b.health)
    }

    /// Snapshot of every backend, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.lock().clone()
    }

    /// Backend names to try, in `preference` order of kinds.
    ///
    /// Within a kind, registration order is kept. Unavailable backends are
    /// skipped unless they are FILE backends or their last probe is older than
    /// `retry_after`; a retried backend has its probe time bumped so concurrent
    /// callers do not all retry it at once. If nothing is left, every FILE
    /// backend is returned.
    #[must_use]
    pub fn ordered_backends(&self, preference: &[BackendKind]) -> Vec<String> {
        let now = Utc::now();
        let retry_after = TimeDelta::from_std(self.config.retry_after).unwrap_or(TimeDelta::MAX);
        let mut backends = self.backends.lock();
        let mut ordered = Vec::new();

        for kind in preference {
            for backend in backends.iter_mut().filter(|b| b.kind == *kind) {
                let include = match backend.health {
                    Health::Healthy | Health::Degraded => true,
                    Health::Unavailable if backend.kind == BackendKind::File => true,
                    Health::Unavailable => {
                        let due = backend
                            .last_probe_at
                            .is_none_or(|at| now.signed_duration_since(at) >= retry_after);
                        if due {
                            debug!(backend = %backend.name, "Retrying unavailable backend");
                            backend.last_probe_at = Some(now);
                        }
                        due
                    }
                };
                if include && !ordered.contains(&backend.name) {
                    ordered.push(backend.name.clone());
                }
            }
        }

        if ordered.is_empty() {
            ordered = backends
                .iter()
                .filter(|b| b.kind == BackendKind::File)
                .map(|b| b.name.clone())
                .collect();
        }
        ordered
    }
}

fn log_transition(backend: &BackendDescriptor, previous: Health) {
    match backend.health {
        Health::Healthy => info!(backend = %backend.name, %previous, "Backend recovered"),
        Health::Degraded => debug!(
            backend = %backend.name,
            failures = backend.consecutive_failures,
            "Backend degraded"
        ),
        Health::Unavailable => warn!(
            backend = %backend.name,
            failures = backend.consecutive_failures,
            "Backend unavailable"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(retry_after: Duration) -> BackendHealthMonitor {
        let monitor = BackendHealthMonitor::new(HealthConfig {
            unavailable_after: 3,
            retry_after,
        });
        monitor.register("memory", BackendKind::Fast);
        monitor.register("sqlite", BackendKind::Document);
        monitor.register("file", BackendKind::File);
        monitor
    }

    #[test]
    fn test_transitions() {
        let m = monitor(DEFAULT_RETRY_AFTER);
        assert_eq!(m.status("memory"), Health::Healthy);

        m.report_outcome("memory", false);
        assert_eq!(m.status("memory"), Health::Degraded);
        m.report_outcome("memory", false);
        assert_eq!(m.status("memory"), Health::Degraded);
        m.report_outcome("memory", false);
        assert_eq!(m.status("memory"), Health::Unavailable);

        m.report_outcome("memory", true);
        assert_eq!(m.status("memory"), Health::Healthy);
        let d = m.descriptors().into_iter().find(|d| d.name == "memory").unwrap();
        assert_eq!(d.consecutive_failures, 0);
        assert!(d.last_success_at.is_some());
    }

    #[test]
    fn test_unknown_backend_is_unavailable() {
        let m = monitor(DEFAULT_RETRY_AFTER);
        assert_eq!(m.status("nope"), Health::Unavailable);
        m.report_outcome("nope", true);
        assert_eq!(m.descriptors().len(), 3);
    }

    #[test]
    fn test_ordered_backends_skips_unavailable() {
        let m = monitor(DEFAULT_RETRY_AFTER);
        assert_eq!(m.ordered_backends(&BackendKind::PREFERENCE), vec!["memory", "sqlite", "file"]);

        m.mark_unavailable("memory");
        m.report_outcome("sqlite", false);
        assert_eq!(m.ordered_backends(&BackendKind::PREFERENCE), vec!["sqlite", "file"]);

        m.mark_unavailable("sqlite");
        m.mark_unavailable("file");
        assert_eq!(m.ordered_backends(&BackendKind::PREFERENCE), vec!["file"]);
    }

    #[test]
    fn test_file_returned_when_not_preferred() {
        let m = monitor(DEFAULT_RETRY_AFTER);
        m.mark_unavailable("memory");
        assert_eq!(m.ordered_backends(&[BackendKind::Fast]), vec!["file"]);
    }

    #[test]
    fn test_unavailable_backend_retried_after_window() {
        let m = monitor(Duration::ZERO);
        m.mark_unavailable("memory");
        assert_eq!(
            m.ordered_backends(&BackendKind::PREFERENCE),
            vec!["memory", "sqlite", "file"]
        );
    }

    #[test]
    fn test_preference_order_is_respected() {
        let m = monitor(DEFAULT_RETRY_AFTER);
        assert_eq!(
            m.ordered_backends(&[BackendKind::File, BackendKind::Fast]),
            vec!["file", "memory"]
        );
    }
}
