use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide connection counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    accepted: AtomicU64,
    active: AtomicU64,
    closed: AtomicU64,
    auth_failures: AtomicU64,
    throttled: AtomicU64,
    unauth_terminated: AtomicU64,
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub closed: u64,
    pub auth_failures: u64,
    pub throttled: u64,
    pub unauth_terminated: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unauth_terminated(&self) {
        self.unauth_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            unauth_terminated: self.unauth_terminated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.auth_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.closed, 1);
        assert_eq!(snapshot.auth_failures, 1);
        assert_eq!(snapshot.throttled, 0);
    }
}
