//! Outbound writer with a stall deadline.

use std::time::Duration;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{FlowError, KeepAliveState};
use crate::bolt::codec::Outbound;
use crate::bolt::error::BoltError;

/// Drains the outbound channel into the transport.
///
/// Every write and flush must complete within `max_duration`; a peer that
/// stops reading for longer gets its connection closed.
#[derive(Debug, Clone)]
pub struct WriteThrottle {
    connection_id: String,
    max_duration: Duration,
}

impl WriteThrottle {
    pub fn new(connection_id: impl Into<String>, max_duration: Duration) -> Self {
        Self {
            connection_id: connection_id.into(),
            max_duration,
        }
    }

    /// Runs until the channel closes, the token is cancelled or a write fails.
    ///
    /// A breach cancels `cancel` so the rest of the connection stops too.
    pub async fn run<S>(
        &self,
        mut sink: S,
        mut outbound: mpsc::Receiver<Outbound>,
        keep_alive: Option<&KeepAliveState>,
        cancel: CancellationToken,
    ) -> Result<(), FlowError>
    where
        S: Sink<Outbound, Error = BoltError> + Unpin,
    {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(connection_id = %self.connection_id, "writer cancelled");
                    return Ok(());
                }
                item = outbound.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            self.guarded(sink.feed(item), &cancel).await?;
            if let Some(state) = keep_alive {
                state.touch();
            }
            if outbound.is_empty() {
                self.guarded(sink.flush(), &cancel).await?;
            }
        }

        self.guarded(sink.flush(), &cancel).await?;
        debug!(connection_id = %self.connection_id, "writer finished");
        Ok(())
    }

    async fn guarded<F>(&self, write: F, cancel: &CancellationToken) -> Result<(), FlowError>
    where
        F: std::future::Future<Output = Result<(), BoltError>>,
    {
        match timeout(self.max_duration, write).await {
            Ok(result) => result.map_err(FlowError::from),
            Err(_) => {
                error!(
                    connection_id = %self.connection_id,
                    max_duration = ?self.max_duration,
                    "Client {} failed to consume outgoing buffer within the configured max duration of {:?}; connection is being closed.",
                    self.connection_id,
                    self.max_duration
                );
                cancel.cancel();
                Err(FlowError::WriteStalled(self.max_duration))
            }
        }
    }
}
