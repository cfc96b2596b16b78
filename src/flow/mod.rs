//! # Flow control
//!
//! - [`ReadLimiter`] - suspends reads when the inbound queue is too deep
//! - [`WriteThrottle`] - closes connections whose peer stops reading
//! - [`KeepAliveScheduler`] - NOOPs while a request runs for long
//! - [`UnauthGuard`] - time and byte budget before authentication
//!
//! Timers and watchdogs only touch atomics and cancellation tokens; they
//! never mutate session state.

mod keep_alive;
mod read_limiter;
mod unauth;
mod write_throttle;

use std::time::Duration;

use thiserror::Error;

pub use keep_alive::{KeepAliveScheduler, KeepAliveState};
pub use read_limiter::ReadLimiter;
pub use unauth::{MeteredRead, UnauthGuard};
pub use write_throttle::WriteThrottle;

use crate::bolt::error::BoltError;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("outbound buffer stalled for longer than {0:?}")]
    WriteStalled(Duration),

    #[error(transparent)]
    Write(#[from] BoltError),
}
