//! Limits on connections that have not authenticated yet.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Debug)]
struct GuardState {
    connection_id: String,
    max_inbound_bytes: u64,
    inbound_bytes: AtomicU64,
    authenticated: AtomicBool,
    breached: AtomicBool,
    cancel: CancellationToken,
}

impl GuardState {
    fn breach(&self, reason: std::fmt::Arguments<'_>) {
        if !self.breached.swap(true, Ordering::AcqRel) {
            error!(connection_id = %self.connection_id, "{}", reason);
            self.cancel.cancel();
        }
    }
}

/// Time and byte budget for the unauthenticated phase of a connection.
///
/// A breach cancels the connection token; nothing is sent to the peer.
#[derive(Debug, Clone)]
pub struct UnauthGuard {
    state: Arc<GuardState>,
}

impl UnauthGuard {
    pub fn new(connection_id: impl Into<String>, max_inbound_bytes: u64, cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(GuardState {
                connection_id: connection_id.into(),
                max_inbound_bytes,
                inbound_bytes: AtomicU64::new(0),
                authenticated: AtomicBool::new(false),
                breached: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    /// Stops both limits.
    pub fn authenticated(&self) {
        self.state.authenticated.store(true, Ordering::Release);
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.authenticated.load(Ordering::Acquire)
    }

    pub fn is_breached(&self) -> bool {
        self.state.breached.load(Ordering::Acquire)
    }

    pub fn inbound_bytes(&self) -> u64 {
        self.state.inbound_bytes.load(Ordering::Acquire)
    }

    /// Wraps the read half so that inbound bytes are counted.
    pub fn meter<R>(&self, inner: R) -> MeteredRead<R> {
        MeteredRead {
            inner,
            state: Arc::clone(&self.state),
        }
    }

    /// Starts the authentication deadline.
    pub fn spawn_timer(&self, timeout: Duration) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::select! {
                _ = state.cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if !state.authenticated.load(Ordering::Acquire) {
                        state.breach(format_args!(
                            "Terminated connection '{}' as the client failed to authenticate within {} ms.",
                            state.connection_id,
                            timeout.as_millis()
                        ));
                    }
                }
            }
        })
    }
}

/// Read half that reports to an [`UnauthGuard`].
#[derive(Debug)]
pub struct MeteredRead<R> {
    inner: R,
    state: Arc<GuardState>,
}

impl<R: AsyncRead + Unpin> AsyncRead for MeteredRead<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;
                let state = &this.state;
                if read > 0 && !state.authenticated.load(Ordering::Acquire) {
                    let total = state.inbound_bytes.fetch_add(read, Ordering::AcqRel) + read;
                    if total > state.max_inbound_bytes {
                        state.breach(format_args!(
                            "Terminated connection '{}' as the client exceeded the unauthenticated inbound limit of {} bytes.",
                            state.connection_id,
                            state.max_inbound_bytes
                        ));
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "unauthenticated inbound limit exceeded",
                        )));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels() {
        let cancel = CancellationToken::new();
        let guard = UnauthGuard::new("bolt-1", 1024, cancel.clone());
        let timer = guard.spawn_timer(Duration::from_secs(30));
        timer.await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(guard.is_breached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticated_before_deadline() {
        let cancel = CancellationToken::new();
        let guard = UnauthGuard::new("bolt-1", 1024, cancel.clone());
        let timer = guard.spawn_timer(Duration::from_secs(30));
        guard.authenticated();
        timer.await.unwrap();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_byte_limit() {
        let cancel = CancellationToken::new();
        let guard = UnauthGuard::new("bolt-1", 16, cancel.clone());
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = guard.meter(server);

        client.write_all(&[0u8; 10]).await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 10);

        client.write_all(&[0u8; 10]).await.unwrap();
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_bytes_after_auth_not_counted() {
        let guard = UnauthGuard::new("bolt-1", 4, CancellationToken::new());
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = guard.meter(server);
        guard.authenticated();

        client.write_all(&[0u8; 32]).await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 32);
        assert_eq!(guard.inbound_bytes(), 0);
    }
}
