//! The Metrics Registry (spec.md §4.5): process-wide atomic counters.
//! Readers get a consistent-per-counter but not cross-counter-atomic
//! snapshot; there is no lock spanning all five fields.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    listeners_count: AtomicI64,
    active_sessions: AtomicI64,
    sessions_total: AtomicU64,
    bytes_up_total: AtomicU64,
    bytes_down_total: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Metrics(Arc<Counters>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listeners_count(&self, n: usize) {
        self.0.listeners_count.store(n as i64, Ordering::Relaxed);
    }

    /// Bumps both active_sessions and sessions_total, as one session start.
    pub fn inc_active_sessions(&self) {
        self.0.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.0.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_sessions(&self) {
        self.0.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes_up(&self, n: u64) {
        self.0.bytes_up_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, n: u64) {
        self.0.bytes_down_total.fetch_add(n, Ordering::Relaxed);
    }

    /// Bumps active_sessions/sessions_total now; the returned guard
    /// decrements active_sessions exactly once, whenever it is dropped.
    pub fn session_guard(&self) -> ActiveSessionGuard {
        self.inc_active_sessions();
        ActiveSessionGuard(self.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            listeners: self.0.listeners_count.load(Ordering::Relaxed),
            active_sessions: self.0.active_sessions.load(Ordering::Relaxed),
            sessions_total: self.0.sessions_total.load(Ordering::Relaxed),
            bytes_up_total: self.0.bytes_up_total.load(Ordering::Relaxed),
            bytes_down_total: self.0.bytes_down_total.load(Ordering::Relaxed),
        }
    }
}

/// RAII handle for one session's active_sessions accounting: constructed on
/// dial success, dropped (in any order of completion) when the session ends.
pub struct ActiveSessionGuard(Metrics);

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.0.dec_active_sessions();
    }
}

/// Matches the counters snapshot schema named in spec.md §6.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub listeners: i64,
    pub active_sessions: i64,
    pub sessions_total: u64,
    pub bytes_up_total: u64,
    pub bytes_down_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_sessions_returns_to_prior_value() {
        let metrics = Metrics::new();
        metrics.inc_active_sessions();
        metrics.inc_active_sessions();
        assert_eq!(metrics.snapshot().active_sessions, 2);
        assert_eq!(metrics.snapshot().sessions_total, 2);

        metrics.dec_active_sessions();
        metrics.dec_active_sessions();
        let snap = metrics.snapshot();
        assert_eq!(snap.active_sessions, 0);
        assert_eq!(snap.sessions_total, 2);
        assert!(snap.active_sessions as u64 <= snap.sessions_total);
    }
}
