use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Out-of-band RESET signalling between the reader and the session.
///
/// The reader calls [`interrupt`](Self::interrupt) as soon as it decodes a
/// RESET, before the message is queued. That cancels the token handed to
/// running work. The session answers queued messages with IGNORED while any
/// interrupt is pending and only the last RESET actually resets.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    pending: AtomicUsize,
    token: Mutex<CancellationToken>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(0),
                token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn interrupt(&self) {
        let token = self.inner.token.lock();
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire) > 0
    }

    /// Token for work started now.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.lock().clone()
    }

    /// Accounts for one processed RESET. Returns `true` for the last pending
    /// one, after which a fresh token is issued.
    pub fn acknowledge_reset(&self) -> bool {
        let mut token = self.inner.token.lock();
        let previous = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            true
        } else {
            false
        }
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_reset() {
        let handle = InterruptHandle::new();
        let running = handle.token();
        handle.interrupt();
        assert!(running.is_cancelled());
        assert!(handle.is_interrupted());

        assert!(handle.acknowledge_reset());
        assert!(!handle.is_interrupted());
        assert!(!handle.token().is_cancelled());
    }

    #[test]
    fn test_only_last_reset_counts() {
        let handle = InterruptHandle::new();
        handle.interrupt();
        handle.interrupt();
        assert!(!handle.acknowledge_reset());
        assert!(handle.is_interrupted());
        assert!(handle.token().is_cancelled());
        assert!(handle.acknowledge_reset());
        assert!(!handle.token().is_cancelled());
    }

    #[test]
    fn test_reset_without_interrupt() {
        let handle = InterruptHandle::new();
        assert!(handle.acknowledge_reset());
        assert!(!handle.is_interrupted());
    }
}
