//! Per-connection runtime: handshake, reader, session and writer.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::transport::BoxedIo;
use super::Shared;
use crate::bolt::codec::{BoltServerCodec, Inbound};
use crate::bolt::message::BoltRequest;
use crate::bolt::packstream::StructProfile;
use crate::flow::{FlowError, ReadLimiter, UnauthGuard, WriteThrottle};
use crate::session::{InterruptHandle, Session, SessionEvent, SessionState};

/// Serves one connection until it closes. Returns `None` when the Bolt
/// handshake did not complete.
pub(crate) async fn serve_connection(
    mut io: BoxedIo,
    id: String,
    peer: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Option<SessionState> {
    let context = Arc::clone(&shared.context);
    let config = Arc::clone(&context.config);

    // The authentication deadline covers the handshake as well.
    let guard = UnauthGuard::new(id.clone(), config.unauth_max_inbound_bytes, cancel.clone());
    let timer = guard.spawn_timer(config.unauth_timeout);

    let handshake = tokio::select! {
        _ = cancel.cancelled() => None,
        result = shared.handshake.negotiate(&mut io) => match result {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(connection_id = %id, peer = %peer, error = %e, "handshake failed");
                None
            }
        },
    };
    let Some(handshake) = handshake else {
        timer.abort();
        if guard.is_breached() {
            context.metrics.unauth_terminated();
        }
        return None;
    };

    let version = handshake.version;
    context.registry.update(&id, |c| c.version = Some(version));
    debug!(connection_id = %id, version = %version, "connection negotiated");

    let profile = StructProfile::new(version).with_max_nesting_depth(config.max_nesting_depth);
    let codec = || {
        BoltServerCodec::with_limits(
            profile.clone(),
            config.chunk_size,
            config.max_message_size,
            config.max_container_size,
        )
    };
    let (read_half, write_half) = tokio::io::split(io);
    let frames = FramedRead::new(guard.meter(read_half), codec());
    let sink = FramedWrite::new(write_half, codec());

    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer_capacity);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let limiter = Arc::new(ReadLimiter::new(
        id.clone(),
        config.read_low_watermark,
        config.read_high_watermark,
    ));
    let interrupts = InterruptHandle::new();
    let keep_alive = version
        .supports_noop()
        .then(|| shared.keep_alive.register(id.clone(), &outbound_tx));

    let mut session = Session::new(id.clone(), peer.to_string(), profile.clone(), Arc::clone(&context), outbound_tx)
        .with_interrupts(interrupts.clone())
        .with_unauth_guard(guard.clone());
    if let Some(state) = &keep_alive {
        session = session.with_keep_alive(Arc::clone(state));
    }

    let reader = tokio::spawn(read_loop(
        frames,
        event_tx,
        Arc::clone(&limiter),
        interrupts,
        cancel.clone(),
    ));

    let writer = async {
        let throttle = WriteThrottle::new(id.clone(), config.write_throttle_max_duration);
        match throttle
            .run(sink, outbound_rx, keep_alive.as_deref(), cancel.clone())
            .await
        {
            Ok(()) => {}
            Err(FlowError::WriteStalled(_)) => context.metrics.write_throttled(),
            Err(e) => debug!(connection_id = %id, error = %e, "write failed"),
        }
        // the writer only finishes once the session is gone or on error
        cancel.cancel();
    };

    let (state, ()) = tokio::join!(session.run(event_rx, limiter, cancel.clone()), writer);

    cancel.cancel();
    timer.abort();
    if guard.is_breached() {
        context.metrics.unauth_terminated();
    }
    if let Err(e) = reader.await {
        debug!(connection_id = %id, error = %e, "reader task failed");
    }
    info!(connection_id = %id, peer = %peer, state = %state, "connection closed");
    Some(state)
}

/// Decodes messages and queues them for the session.
///
/// RESET is signalled out of band before it is queued so that running work
/// is interrupted without waiting for its turn.
async fn read_loop<R>(
    mut frames: FramedRead<R, BoltServerCodec>,
    events: mpsc::UnboundedSender<SessionEvent>,
    limiter: Arc<ReadLimiter>,
    interrupts: InterruptHandle,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = limiter.wait_readable() => {}
        }

        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = frames.next() => item,
        };

        let (event, last) = match item {
            Some(Ok(Inbound::Request(request))) => {
                if matches!(request, BoltRequest::Reset) {
                    interrupts.interrupt();
                }
                (SessionEvent::Request(request), false)
            }
            Some(Ok(Inbound::Invalid(e))) => (SessionEvent::Invalid(e), false),
            Some(Err(e)) => (SessionEvent::Fatal(e), true),
            None => (SessionEvent::PeerClosed, true),
        };

        limiter.on_enqueue();
        if events.send(event).is_err() || last {
            break;
        }
    }
}
