//! NOOP keep-alives while a request runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::bolt::codec::Outbound;

/// Per-connection view of the scheduler.
///
/// Only atomics are touched from the scheduler task; the NOOP itself goes
/// through the connection's outbound channel.
#[derive(Debug)]
pub struct KeepAliveState {
    connection_id: String,
    epoch: Instant,
    in_flight: AtomicBool,
    /// Milliseconds since `epoch`
    last_activity: AtomicU64,
    /// Weak so that the writer sees the channel close once the session ends
    outbound: mpsc::WeakSender<Outbound>,
}

impl KeepAliveState {
    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Records that something was written to the peer.
    pub fn touch(&self) {
        self.last_activity.store(self.elapsed_ms(), Ordering::Release);
    }

    pub fn begin_request(&self) {
        self.touch();
        self.in_flight.store(true, Ordering::Release);
    }

    pub fn end_request(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }
}

/// Process-wide ticker over weakly held connections.
#[derive(Debug)]
pub struct KeepAliveScheduler {
    interval: Duration,
    granularity: Duration,
    registrations: Mutex<Vec<Weak<KeepAliveState>>>,
}

impl KeepAliveScheduler {
    pub fn new(interval: Duration, granularity: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval,
            granularity,
            registrations: Mutex::new(Vec::new()),
        })
    }

    /// Registers a connection. Dropping the returned state unregisters it.
    pub fn register(
        &self,
        connection_id: impl Into<String>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> Arc<KeepAliveState> {
        let state = Arc::new(KeepAliveState {
            connection_id: connection_id.into(),
            epoch: Instant::now(),
            in_flight: AtomicBool::new(false),
            last_activity: AtomicU64::new(0),
            outbound: outbound.downgrade(),
        });
        self.registrations.lock().push(Arc::downgrade(&state));
        state
    }

    pub fn registered(&self) -> usize {
        self.registrations.lock().len()
    }

    /// One pass over the registrations; returns how many NOOPs were queued.
    pub fn tick(&self) -> usize {
        let mut sent = 0;
        self.registrations.lock().retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let Some(outbound) = state.outbound.upgrade() else {
                return false;
            };
            if state.is_in_flight() && state.idle_for() >= self.interval {
                // A full channel already means output is pending.
                if outbound.try_send(Outbound::Noop).is_ok() {
                    trace!(connection_id = %state.connection_id, "keep-alive sent");
                    state.touch();
                    sent += 1;
                }
            }
            !outbound.is_closed()
        });
        sent
    }

    /// Ticks at the configured granularity until `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(scheduler.granularity);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.tick();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_noop_only_while_in_flight() {
        let scheduler = KeepAliveScheduler::new(Duration::from_secs(2), Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(4);
        let state = scheduler.register("bolt-1", &tx);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(scheduler.tick(), 0);

        state.begin_request();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(scheduler.tick(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Noop);

        // sending resets the idle clock
        assert_eq!(scheduler.tick(), 0);

        state.end_request();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.tick(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_postpones_noop() {
        let scheduler = KeepAliveScheduler::new(Duration::from_secs(2), Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(4);
        let state = scheduler.register("bolt-1", &tx);
        state.begin_request();

        tokio::time::advance(Duration::from_millis(1500)).await;
        state.touch();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(scheduler.tick(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_state_unregisters() {
        let scheduler = KeepAliveScheduler::new(Duration::from_secs(2), Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(4);
        let state = scheduler.register("bolt-1", &tx);
        assert_eq!(scheduler.registered(), 1);
        drop(state);
        scheduler.tick();
        assert_eq!(scheduler.registered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_ticker() {
        let scheduler = KeepAliveScheduler::new(Duration::from_secs(2), Duration::from_millis(500));
        let (tx, mut rx) = mpsc::channel(4);
        let state = scheduler.register("bolt-1", &tx);
        state.begin_request();

        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());
        assert_eq!(rx.recv().await, Some(Outbound::Noop));
        shutdown.cancel();
        handle.await.unwrap();
    }
}
