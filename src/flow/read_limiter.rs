//! Inbound queue watermarks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::info;

/// Suspends reading while too many decoded messages wait for the session.
///
/// The reader calls [`on_enqueue`](Self::on_enqueue) per message it queues and
/// awaits [`wait_readable`](Self::wait_readable) before reading more; the
/// session calls [`on_dequeue`](Self::on_dequeue) per message it takes. The
/// session keeps draining while reads are off, so the two never wait on each
/// other.
#[derive(Debug)]
pub struct ReadLimiter {
    connection_id: String,
    low_watermark: usize,
    high_watermark: usize,
    depth: AtomicUsize,
    suspended: AtomicBool,
    resume: Notify,
}

impl ReadLimiter {
    pub fn new(connection_id: impl Into<String>, low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            connection_id: connection_id.into(),
            low_watermark,
            high_watermark,
            depth: AtomicUsize::new(0),
            suspended: AtomicBool::new(false),
            resume: Notify::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn on_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if depth > self.high_watermark
            && self
                .suspended
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            info!(
                connection_id = %self.connection_id,
                depth,
                "Channel [{}]: client produced {} messages on the worker queue, auto-read is being disabled.",
                self.connection_id,
                depth
            );
        }
    }

    pub fn on_dequeue(&self) {
        let depth = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .map_or(0, |previous| previous.saturating_sub(1));
        if depth < self.low_watermark
            && self
                .suspended
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            info!(
                connection_id = %self.connection_id,
                depth,
                "Channel [{}]: consumed messages on the worker queue below {}, auto-read is being enabled.",
                self.connection_id,
                self.low_watermark
            );
            self.resume.notify_one();
        }
    }

    /// Returns once reading is allowed.
    pub async fn wait_readable(&self) {
        while self.is_suspended() {
            self.resume.notified().await;
        }
    }
}
