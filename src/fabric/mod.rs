//! Message fabric connecting the flight software tasks.
//!
//! Three primitives, all built on tokio channels:
//!
//! - [`channel`]: bounded FIFO queues with timeout-bounded send/receive
//! - [`rpc`]: synchronous call/reply where the target answers explicitly
//! - [`barrier`]: one-shot readiness signal for startup ordering
//!
//! Every suspension point takes a [`Wait`]: either forever or a bounded
//! window. An elapsed window is reported as [`ChannelError::Timeout`], which
//! callers treat as ordinary control flow.
//!
//! [`ChannelError::Timeout`]: crate::ChannelError::Timeout

pub mod barrier;
pub mod channel;
pub mod rpc;

pub use barrier::{ReadySignal, ReadyWaiter, readiness, wait_all};
pub use channel::{Receiver, Sender, bounded, forward_with_retry};
pub use rpc::{Call, Caller, Inbox, endpoint};

use std::time::Duration;

/// How long a suspension point may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    For(Duration),
}

/// Pause before retrying a collaborator read after `failures` consecutive
/// errors: 50ms after the first, doubling up to 1.6s.
pub fn failure_backoff(failures: u32) -> Duration {
    Duration::from_millis(50 << failures.saturating_sub(1).min(5))
}
