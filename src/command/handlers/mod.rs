//! Subsystem command handlers.
//!
//! Each handler is a task serving its own call inbox. State it owns (scan
//! flag, acquisition state) is mutated only inside that task.

pub mod imaging;
pub mod magnetometer;
pub mod relay;
pub mod software;

pub use imaging::{ImagingHandler, ImagingState};
pub use magnetometer::MagnetometerHandler;
pub use relay::RelayHandler;
pub use software::SoftwareHandler;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ExecStatus, HandlerInbox};
use crate::codec::CommandTransferFrame;
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Wait, wait_all};

/// A handler that answers each command before taking the next one.
#[async_trait::async_trait]
pub trait CommandHandler: Send + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&mut self, frame: CommandTransferFrame) -> ExecStatus;
}

/// Serve `inbox` with `handler` until cancelled or every caller is gone.
pub async fn serve<H: CommandHandler>(
    mut handler: H,
    mut inbox: HandlerInbox,
    upstream: Vec<ReadyWaiter>,
    ready: ReadySignal,
    cancel: CancellationToken,
) {
    if wait_all(upstream).await.is_err() {
        warn!("{} handler dependencies went away before startup", handler.name());
        return;
    }
    ready.raise();
    info!("{} handler started", handler.name());

    loop {
        let call = tokio::select! {
            _ = cancel.cancelled() => break,
            call = inbox.recv(Wait::Forever) => call,
        };
        match call {
            Ok(call) => {
                let frame = *call.request();
                let status = handler.handle(frame).await;
                call.reply(status);
            }
            Err(ChannelError::Closed) => break,
            Err(e) => warn!("{} handler receive failed: {}", handler.name(), e),
        }
    }

    info!("{} handler ended", handler.name());
}

fn unknown_name(handler: &str, frame: &CommandTransferFrame) -> ExecStatus {
    warn!("Invalid {} command name {:#06x}", handler, frame.packet_name);
    ExecStatus::Fail
}
