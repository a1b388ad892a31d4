//! Startup readiness barrier.
//!
//! A consumer raises its [`ReadySignal`] once it is initialized; each producer
//! awaits a [`ReadyWaiter`] before it starts sending.

use tokio::sync::watch;

use crate::error::ChannelError;

pub fn readiness() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = watch::channel(false);
    (ReadySignal { tx }, ReadyWaiter { rx })
}

/// Raised once by the consumer.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn raise(self) {
        self.tx.send_replace(true);
    }
}

/// Awaited by any number of producers.
#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<bool>,
}

impl ReadyWaiter {
    /// Resolve once the signal has been raised.
    ///
    /// Fails with [`ChannelError::Closed`] if the consumer went away without
    /// raising it.
    pub async fn wait(mut self) -> Result<(), ChannelError> {
        self.rx.wait_for(|ready| *ready).await.map(|_| ()).map_err(|_| ChannelError::Closed)
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Wait for every signal in `waiters`.
pub async fn wait_all(waiters: Vec<ReadyWaiter>) -> Result<(), ChannelError> {
    for waiter in waiters {
        waiter.wait().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn producers_wait_until_raised() {
        let (signal, waiter) = readiness();
        assert!(!waiter.is_ready());

        let producer = tokio::spawn(waiter.clone().wait());
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        signal.raise();
        producer.await.unwrap().unwrap();
        assert!(waiter.is_ready());
        // raised signals stay raised for late waiters
        waiter.wait().await.unwrap();
    }

    #[tokio::test]
    async fn consumer_gone_before_raise() {
        let (signal, waiter) = readiness();
        drop(signal);
        assert_eq!(waiter.wait().await, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn wait_all_needs_every_signal() {
        let (a, wa) = readiness();
        let (b, wb) = readiness();
        let all = tokio::spawn(wait_all(vec![wa, wb]));
        a.raise();
        tokio::task::yield_now().await;
        assert!(!all.is_finished());
        b.raise();
        all.await.unwrap().unwrap();
    }
}
