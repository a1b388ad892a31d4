//! Synchronous call/reply.
//!
//! The caller sends a [`Call`] carrying a oneshot reply slot and blocks until
//! the target answers. The target may answer before its work is finished
//! (for example with an in-progress status) and keep running.

use tokio::sync::{mpsc, oneshot};

use super::Wait;
use crate::error::ChannelError;

/// Create a call endpoint with room for `capacity` queued calls.
pub fn endpoint<Req, Resp>(capacity: usize) -> (Caller<Req, Resp>, Inbox<Req, Resp>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Caller { tx }, Inbox { rx })
}

/// A request awaiting its reply.
#[derive(Debug)]
pub struct Call<Req, Resp> {
    request: Req,
    reply: oneshot::Sender<Resp>,
}

impl<Req, Resp> Call<Req, Resp> {
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// Answer the caller. Returns false if the caller has gone away.
    pub fn reply(self, response: Resp) -> bool {
        self.reply.send(response).is_ok()
    }
}

/// Calling side. Cheap to clone.
#[derive(Debug)]
pub struct Caller<Req, Resp> {
    tx: mpsc::Sender<Call<Req, Resp>>,
}

impl<Req, Resp> Clone for Caller<Req, Resp> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<Req, Resp> Caller<Req, Resp> {
    /// Send `request` and wait for the target's reply.
    ///
    /// A target that drops the call without replying yields
    /// [`ChannelError::Closed`].
    pub async fn call(&self, request: Req) -> Result<Resp, ChannelError> {
        let (reply, response) = oneshot::channel();
        self.tx.send(Call { request, reply }).await.map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)
    }
}

/// Target side. Owned by the task that serves the calls.
#[derive(Debug)]
pub struct Inbox<Req, Resp> {
    rx: mpsc::Receiver<Call<Req, Resp>>,
}

impl<Req, Resp> Inbox<Req, Resp> {
    pub async fn recv(&mut self, wait: Wait) -> Result<Call<Req, Resp>, ChannelError> {
        match wait {
            Wait::Forever => self.rx.recv().await.ok_or(ChannelError::Closed),
            Wait::For(window) => match tokio::time::timeout(window, self.rx.recv()).await {
                Ok(Some(call)) => Ok(call),
                Ok(None) => Err(ChannelError::Closed),
                Err(_) => Err(ChannelError::Timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn call_waits_for_explicit_reply() {
        let (caller, mut inbox) = endpoint::<u32, u32>(1);
        let server = tokio::spawn(async move {
            let call = inbox.recv(Wait::Forever).await.unwrap();
            let doubled = call.request() * 2;
            assert!(call.reply(doubled));
        });
        assert_eq!(caller.call(21).await.unwrap(), 42);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_call_reports_closed() {
        let (caller, mut inbox) = endpoint::<(), ()>(1);
        tokio::spawn(async move {
            let call = inbox.recv(Wait::Forever).await.unwrap();
            drop(call);
        });
        assert_eq!(caller.call(()).await, Err(ChannelError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn inbox_poll_times_out() {
        let (_caller, mut inbox) = endpoint::<(), ()>(1);
        let result = inbox.recv(Wait::For(Duration::from_secs(60))).await;
        assert!(matches!(result, Err(ChannelError::Timeout)));
    }
}
