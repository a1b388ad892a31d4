//! Absolute-time command scheduler.
//!
//! Holds ATC frames ordered by execution time, then arrival, and re-injects
//! each one into the executor with its ATC flag cleared once it is due.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ExecStatus, HandlerInbox};
use crate::clock::{MissionClock, MissionTime};
use crate::codec::CommandTransferFrame;
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, Sender, Wait};

pub struct Scheduler {
    pub inbox: HandlerInbox,
    pub executor: Sender<CommandTransferFrame>,
    pub clock: MissionClock,
    pub retry_delay: Duration,
    queue: BTreeMap<(MissionTime, u64), CommandTransferFrame>,
    arrivals: u64,
    retry_at: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        inbox: HandlerInbox,
        executor: Sender<CommandTransferFrame>,
        clock: MissionClock,
        retry_delay: Duration,
    ) -> Self {
        Self { inbox, executor, clock, retry_delay, queue: BTreeMap::new(), arrivals: 0, retry_at: None }
    }

    fn hold(&mut self, frame: CommandTransferFrame) {
        self.arrivals += 1;
        self.queue.insert((frame.execution_time, self.arrivals), frame);
    }

    /// When the earliest frame should next be looked at.
    fn next_wake(&self) -> Option<Instant> {
        let (&(time, _), _) = self.queue.first_key_value()?;
        let due = Instant::now() + self.clock.until(time);
        Some(match self.retry_at {
            Some(retry) if retry > due => retry,
            _ => due,
        })
    }

    /// Push every due frame to the executor. Returns false once the executor is gone.
    fn release_due(&mut self) -> bool {
        self.retry_at = None;
        let now = self.clock.now();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let frame = entry.get().released();
            match self.executor.try_send(frame) {
                Ok(()) => {
                    entry.remove();
                    debug!("Released ATC command APID {:#05x} name {:#06x}", frame.apid, frame.packet_name);
                }
                Err(ChannelError::Full) => {
                    debug!("Executor queue full, holding released commands");
                    self.retry_at = Some(Instant::now() + self.retry_delay);
                    break;
                }
                Err(_) => return false,
            }
        }
        true
    }

    pub async fn run(mut self, ready: ReadySignal, cancel: CancellationToken) {
        ready.raise();
        info!("Scheduler started");

        loop {
            let wake = self.next_wake();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Scheduler cancelled");
                    break;
                }
                _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    if !self.release_due() {
                        debug!("Command executor gone");
                        break;
                    }
                }
                call = self.inbox.recv(Wait::Forever) => match call {
                    Ok(call) => {
                        let frame = *call.request();
                        info!(
                            "Holding ATC command APID {:#05x} name {:#06x} until {}",
                            frame.apid, frame.packet_name, frame.execution_time
                        );
                        self.hold(frame);
                        call.reply(ExecStatus::Success);
                    }
                    Err(_) => break,
                },
            }
        }

        if !self.queue.is_empty() {
            warn!("Scheduler ended with {} commands pending", self.queue.len());
        }
    }
}
