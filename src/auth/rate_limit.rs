//! Failed-authentication rate limiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// ============================================================================
// Clock
// ============================================================================

/// Time source for the rate limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

// ============================================================================
// AuthRateLimiter
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FailedAttempts {
    count: u32,
    last: Instant,
}

/// Tracks consecutive authentication failures per principal.
///
/// Once `max_failed_attempts` failures have been recorded, further attempts
/// are refused until `lock_window` has passed since the last failure. A
/// failure older than the window starts a fresh count. A success clears the
/// entry.
pub struct AuthRateLimiter {
    max_failed_attempts: u32,
    lock_window: Duration,
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<String, FailedAttempts>>,
}

impl AuthRateLimiter {
    pub fn new(max_failed_attempts: u32, lock_window: Duration) -> Self {
        Self::with_clock(max_failed_attempts, lock_window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_failed_attempts: u32, lock_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_failed_attempts,
            lock_window,
            clock,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn enabled(&self) -> bool {
        self.max_failed_attempts > 0
    }

    /// Whether `key` is currently locked out.
    pub fn is_locked(&self, key: &str) -> bool {
        if !self.enabled() {
            return false;
        }
        let now = self.clock.now();
        self.attempts.lock().get(key).is_some_and(|entry| {
            entry.count >= self.max_failed_attempts
                && now.duration_since(entry.last) < self.lock_window
        })
    }

    pub fn record_failure(&self, key: &str) {
        if !self.enabled() {
            return;
        }
        let now = self.clock.now();
        let mut attempts = self.attempts.lock();
        let window = self.lock_window;
        attempts.retain(|_, entry| now.duration_since(entry.last) < window);

        let entry = attempts.entry(key.to_string()).or_insert(FailedAttempts {
            count: 0,
            last: now,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last = now;
    }

    pub fn record_success(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    /// Number of keys with recorded failures.
    pub fn tracked(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl std::fmt::Debug for AuthRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRateLimiter")
            .field("max_failed_attempts", &self.max_failed_attempts)
            .field("lock_window", &self.lock_window)
            .field("tracked", &self.tracked())
            .finish()
    }
}
