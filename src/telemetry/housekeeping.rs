//! Periodic housekeeping record.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{DispatchCounters, UplinkCounters};
use crate::error::ChannelError;
use crate::fabric::{ReadyWaiter, Sender, Wait};

/// Counters gathered from the command pipeline tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingSnapshot {
    pub uplink: UplinkCounters,
    pub dispatch: DispatchCounters,
}

impl HousekeepingSnapshot {
    pub const RECORD_LEN: usize = 7;

    /// Seven one-byte counters, each truncated to its low byte:
    /// received, valid, invalid telecommands; valid, invalid APIDs;
    /// succeeded, failed commands.
    pub fn to_record(&self) -> [u8; Self::RECORD_LEN] {
        [
            self.uplink.received as u8,
            self.uplink.valid as u8,
            self.uplink.invalid as u8,
            self.dispatch.valid_apid as u8,
            self.dispatch.invalid_apid as u8,
            self.dispatch.succeeded as u8,
            self.dispatch.failed as u8,
        ]
    }
}

pub struct Housekeeping {
    pub uplink: watch::Receiver<UplinkCounters>,
    pub dispatch: watch::Receiver<DispatchCounters>,
    pub packetizer: Sender<Vec<u8>>,
    pub snapshots: watch::Sender<HousekeepingSnapshot>,
    pub period: Duration,
}

impl Housekeeping {
    pub fn snapshot(&self) -> HousekeepingSnapshot {
        HousekeepingSnapshot { uplink: *self.uplink.borrow(), dispatch: *self.dispatch.borrow() }
    }

    pub async fn run(self, packetizer_ready: ReadyWaiter, cancel: CancellationToken) {
        if packetizer_ready.wait().await.is_err() {
            warn!("Packetizer went away before startup");
            return;
        }
        info!("Housekeeping started, period {:?}", self.period);

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.snapshot();
            self.snapshots.send_replace(snapshot);
            trace!("Housekeeping {:?}", snapshot);

            match self.packetizer.send(snapshot.to_record().to_vec(), Wait::For(self.period)).await {
                Ok(()) => {}
                Err(ChannelError::Closed) => break,
                Err(e) => debug!("Housekeeping record dropped: {}", e),
            }
        }

        info!("Housekeeping ended");
    }
}
