//! Uplink receiver: slices the uplink byte stream into telecommand packets.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::command::TELECOMMAND_PACKET_LEN;
use crate::fabric::{ReadyWaiter, Sender, Wait, failure_backoff};

pub type RawTelecommand = [u8; TELECOMMAND_PACKET_LEN];

/// Reads fixed-size packets from the uplink and hands them to the processor.
pub struct UplinkReceiver<R> {
    pub uplink: R,
    pub processor: Sender<RawTelecommand>,
}

impl<R> UplinkReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub async fn run(mut self, processor_ready: ReadyWaiter, cancel: CancellationToken) {
        if processor_ready.wait().await.is_err() {
            warn!("Command processor went away before startup");
            return;
        }
        info!("Uplink receiver started");

        let mut received = 0u64;
        let mut error_count = 0u32;

        loop {
            let mut packet = [0u8; TELECOMMAND_PACKET_LEN];
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Uplink receiver cancelled");
                    break;
                }
                result = self.uplink.read_exact(&mut packet) => result,
            };

            match result {
                Ok(_) => {
                    received += 1;
                    error_count = 0;
                    trace!("Uplink packet {}", received);
                    if self.processor.send(packet, Wait::Forever).await.is_err() {
                        debug!("Command processor gone, stopping receiver");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("Uplink closed");
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Uplink read failed ({}): {}", error_count, e);
                    tokio::time::sleep(failure_backoff(error_count)).await;
                }
            }
        }

        info!("Uplink receiver ended ({} packets)", received);
    }
}
