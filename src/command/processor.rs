//! Telecommand processor: decode, validate, count, forward.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::receiver::RawTelecommand;
use crate::clock::MissionClock;
use crate::codec::{CommandTransferFrame, Telecommand};
use crate::error::{ChannelError, CommandError};
use crate::fabric::{ReadySignal, ReadyWaiter, Receiver, Sender, Wait};

/// Uplink counters owned by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkCounters {
    pub received: u32,
    pub valid: u32,
    pub invalid: u32,
}

pub struct CommandProcessor {
    pub packets: Receiver<RawTelecommand>,
    pub executor: Sender<CommandTransferFrame>,
    pub counters: watch::Sender<UplinkCounters>,
    pub clock: MissionClock,
    pub exec_time_tolerance_secs: u32,
}

impl CommandProcessor {
    /// Decode and check one packet.
    pub fn validate(&self, packet: &RawTelecommand) -> Result<CommandTransferFrame, CommandError> {
        let telecommand =
            Telecommand::decode(packet).map_err(|e| CommandError::invalid(e.to_string()))?;

        let now = self.clock.now();
        let age = now.seconds_since(telecommand.execution_time());
        if age > i64::from(self.exec_time_tolerance_secs) {
            return Err(CommandError::invalid(format!(
                "execution time {} is {}s in the past",
                telecommand.execution_time(),
                age
            )));
        }

        Ok(telecommand.to_transfer_frame())
    }

    pub async fn run(mut self, executor_ready: ReadyWaiter, ready: ReadySignal, cancel: CancellationToken) {
        if executor_ready.wait().await.is_err() {
            warn!("Command executor went away before startup");
            return;
        }
        ready.raise();
        info!("Command processor started");

        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Command processor cancelled");
                    break;
                }
                packet = self.packets.recv(Wait::Forever) => packet,
            };

            let packet = match packet {
                Ok(packet) => packet,
                Err(ChannelError::Closed) => {
                    debug!("Uplink receiver gone");
                    break;
                }
                Err(e) => {
                    warn!("Command processor receive failed: {}", e);
                    continue;
                }
            };

            self.counters.send_modify(|c| c.received = c.received.wrapping_add(1));

            match self.validate(&packet) {
                Ok(frame) => {
                    self.counters.send_modify(|c| c.valid = c.valid.wrapping_add(1));
                    debug!(
                        "Telecommand APID {:#05x} name {:#06x} ATC {} arg {}",
                        frame.apid, frame.packet_name, frame.atc_flag, frame.argument
                    );
                    if self.executor.send(frame, Wait::Forever).await.is_err() {
                        debug!("Command executor gone");
                        break;
                    }
                }
                Err(e) => {
                    self.counters.send_modify(|c| c.invalid = c.invalid.wrapping_add(1));
                    warn!("Dropping telecommand: {}", e);
                }
            }
        }

        let counters = *self.counters.borrow();
        info!(
            "Command processor ended ({} received, {} valid, {} invalid)",
            counters.received, counters.valid, counters.invalid
        );
    }
}
