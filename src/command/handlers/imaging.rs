//! Imaging (APID 0x064) commands and the acquisition loop.
//!
//! ```text
//! Idle --begin--> Acquiring --command arrives--> InterruptPending
//!  ^                 |  ^                              |
//!  |                 |  +------- not a halt -----------+
//!  +-- loop done ----+                                 |
//!  +------------------------- halt --------------------+
//! ```
//!
//! Between exposures the loop waits on its inbox for one interval. A command
//! arriving in that window is answered at once; only a halt ends the loop.
//! An exposure in flight is never interrupted.

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::CommandTransferFrame;
use crate::collaborators::Camera;
use crate::command::{Completion, Destination, ExecStatus, HandlerInbox, names};
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Sender, Wait, wait_all};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagingState {
    Idle,
    Acquiring,
    InterruptPending,
}

pub struct ImagingHandler {
    pub inbox: HandlerInbox,
    pub camera: Box<dyn Camera>,
    /// Raw images for the image pipeline.
    pub images: Sender<Vec<u8>>,
    pub completions: Sender<Completion>,
    pub interval: Duration,
    pub retry_delay: Duration,
    pub state: watch::Sender<ImagingState>,
}

enum LoopExit {
    Finished(ExecStatus),
    Shutdown,
}

impl ImagingHandler {
    pub async fn run(mut self, upstream: Vec<ReadyWaiter>, ready: ReadySignal, cancel: CancellationToken) {
        if wait_all(upstream).await.is_err() {
            warn!("Image pipeline went away before startup");
            return;
        }
        ready.raise();
        info!("imaging handler started");

        loop {
            let call = tokio::select! {
                _ = cancel.cancelled() => break,
                call = self.inbox.recv(Wait::Forever) => call,
            };
            let call = match call {
                Ok(call) => call,
                Err(ChannelError::Closed) => break,
                Err(e) => {
                    warn!("imaging handler receive failed: {}", e);
                    continue;
                }
            };

            let frame = *call.request();
            match frame.packet_name {
                names::IMG_BEGIN => {
                    call.reply(ExecStatus::InProgress);
                    match self.acquisition_loop(frame, &cancel).await {
                        LoopExit::Finished(status) => self.complete(frame, status).await,
                        LoopExit::Shutdown => break,
                    }
                }
                names::IMG_HALT => {
                    warn!("Imaging halt refused: no acquisition running");
                    call.reply(ExecStatus::Fail);
                }
                names::IMG_NOOP => {
                    call.reply(ExecStatus::Success);
                }
                _ => {
                    warn!("Invalid imaging command name {:#06x}", frame.packet_name);
                    call.reply(ExecStatus::Fail);
                }
            }
        }

        info!("imaging handler ended");
    }

    fn transition(&self, next: ImagingState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Imaging {:?} -> {:?}", prev, next);
        }
    }

    async fn acquisition_loop(&mut self, begin: CommandTransferFrame, cancel: &CancellationToken) -> LoopExit {
        let duration = Duration::from_secs(u64::from(begin.argument));
        let mut elapsed = Duration::ZERO;
        let mut acquired = 0u32;
        info!("Acquisition loop started for {:?}", duration);
        self.transition(ImagingState::Acquiring);

        let status = loop {
            if elapsed >= duration {
                break Self::loop_status(acquired);
            }
            if self.acquire_once().await {
                acquired += 1;
            }
            elapsed += self.interval;
            if elapsed >= duration {
                break Self::loop_status(acquired);
            }

            let call = tokio::select! {
                _ = cancel.cancelled() => return LoopExit::Shutdown,
                call = self.inbox.recv(Wait::For(self.interval)) => call,
            };
            let call = match call {
                Ok(call) => call,
                Err(ChannelError::Timeout) => continue,
                Err(_) => return LoopExit::Shutdown,
            };

            self.transition(ImagingState::InterruptPending);
            let frame = *call.request();
            match frame.packet_name {
                names::IMG_HALT => {
                    info!("Acquisition loop halted after {} images", acquired);
                    call.reply(ExecStatus::Success);
                    break Self::loop_status(acquired);
                }
                names::IMG_BEGIN => {
                    warn!("Imaging begin refused: acquisition already running");
                    call.reply(ExecStatus::Fail);
                }
                names::IMG_NOOP => {
                    call.reply(ExecStatus::Success);
                }
                other => {
                    warn!("Invalid imaging command name {:#06x}", other);
                    call.reply(ExecStatus::Fail);
                }
            }
            self.transition(ImagingState::Acquiring);
        };

        self.transition(ImagingState::Idle);
        LoopExit::Finished(status)
    }

    fn loop_status(acquired: u32) -> ExecStatus {
        if acquired > 0 { ExecStatus::Success } else { ExecStatus::Fail }
    }

    /// One exposure. Returns whether an image reached the image pipeline.
    async fn acquire_once(&mut self) -> bool {
        let image = match self.camera.acquire().await {
            Ok(image) => image,
            Err(e) => {
                warn!("Camera acquisition failed: {}", e);
                return false;
            }
        };
        debug!("Acquired {} byte image", image.len());
        match self.images.send(image, Wait::For(self.retry_delay)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping raw image: {}", e);
                false
            }
        }
    }

    async fn complete(&mut self, begin: CommandTransferFrame, status: ExecStatus) {
        let completion = Completion { destination: Destination::Imaging, packet_name: begin.packet_name, status };
        if self.completions.send(completion, Wait::Forever).await.is_err() {
            debug!("Command executor gone, completion not reported");
        }
    }
}
