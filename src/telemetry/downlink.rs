//! Downlink writer: strips the routing prefix and writes packets out.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::codec::TelemetryTransferFrame;
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, Receiver, Wait};
use crate::{CdhError, Result};

fn downlink_io(e: std::io::Error) -> CdhError {
    CdhError::collaborator_failed_with_source("downlink", "write failed", Box::new(e))
}

pub struct Downlink<W> {
    pub frames: Receiver<TelemetryTransferFrame>,
    pub writer: W,
}

impl<W> Downlink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_packet(&mut self, frame: &TelemetryTransferFrame) -> Result<()> {
        self.writer.write_all(frame.packet()).await.map_err(downlink_io)?;
        self.writer.flush().await.map_err(downlink_io)
    }

    pub async fn run(mut self, ready: ReadySignal, cancel: CancellationToken) {
        ready.raise();
        info!("Downlink started");

        let mut sent = 0u64;
        let mut failed = 0u64;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = self.frames.recv(Wait::Forever) => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(ChannelError::Closed) => break,
                Err(e) => {
                    debug!("Downlink receive failed: {}", e);
                    continue;
                }
            };

            match self.write_packet(&frame).await {
                Ok(()) => {
                    sent += 1;
                    trace!("Downlinked APID {:#05x} ({} total)", frame.apid(), sent);
                }
                Err(e) => {
                    failed += 1;
                    error!("{}", e);
                }
            }
        }

        info!("Downlink ended ({} packets sent, {} failed)", sent, failed);
    }
}
