//! Bounded FIFO channels

use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, warn};

use super::Wait;
use crate::error::ChannelError;

/// Create a bounded channel holding at most `capacity` messages.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Sender { inner: tx }, Receiver { inner: rx })
}

/// Sending half. Cloned for multiple producers.
#[derive(Debug)]
pub struct Sender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Sender<T> {
    /// Send, blocking while the channel is full.
    ///
    /// With [`Wait::For`] the send gives up with [`ChannelError::Full`] once
    /// the window elapses.
    pub async fn send(&self, msg: T, wait: Wait) -> Result<(), ChannelError> {
        match wait {
            Wait::Forever => self.inner.send(msg).await.map_err(|_| ChannelError::Closed),
            Wait::For(window) => self.inner.send_timeout(msg, window).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => ChannelError::Full,
                SendTimeoutError::Closed(_) => ChannelError::Closed,
            }),
        }
    }

    /// Send without blocking.
    pub fn try_send(&self, msg: T) -> Result<(), ChannelError> {
        self.inner.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Receiving half. Owned by exactly one task.
#[derive(Debug)]
pub struct Receiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Receive the next message in FIFO order.
    ///
    /// [`ChannelError::Timeout`] means the window elapsed with nothing queued;
    /// [`ChannelError::Closed`] means every sender is gone and the queue is empty.
    pub async fn recv(&mut self, wait: Wait) -> Result<T, ChannelError> {
        match wait {
            Wait::Forever => self.inner.recv().await.ok_or(ChannelError::Closed),
            Wait::For(window) => match tokio::time::timeout(window, self.inner.recv()).await {
                Ok(Some(msg)) => Ok(msg),
                Ok(None) => Err(ChannelError::Closed),
                Err(_) => Err(ChannelError::Timeout),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Hand `msg` to `tx`, retrying once after `delay` if the queue is full.
///
/// Returns whether the message was delivered. A second failure drops the
/// message with a warning; the caller is never blocked longer than `delay`.
pub async fn forward_with_retry<T: Clone>(
    tx: &Sender<T>,
    msg: T,
    delay: Duration,
    sink: &str,
) -> bool {
    match tx.try_send(msg.clone()) {
        Ok(()) => return true,
        Err(ChannelError::Closed) => {
            warn!("{} queue closed, dropping message", sink);
            return false;
        }
        Err(e) => debug!("{} queue: {}, retrying in {:?}", sink, e, delay),
    }

    tokio::time::sleep(delay).await;

    match tx.try_send(msg) {
        Ok(()) => true,
        Err(e) => {
            warn!("Dropping message for {} after retry: {}", sink, e);
            false
        }
    }
}
