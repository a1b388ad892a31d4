//! Command executor: routes frames by ATC flag and destination.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Completion, Destination, ExecStatus, HandlerCaller, Handlers};
use crate::codec::{CommandTransferFrame, Timing};
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Receiver, Wait, wait_all};

/// Dispatch counters owned by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub valid_apid: u32,
    pub invalid_apid: u32,
    pub succeeded: u32,
    pub failed: u32,
}

pub struct Executor {
    /// Decoded frames from the processor and released frames from the scheduler.
    pub inbound: Receiver<CommandTransferFrame>,
    pub completions: Receiver<Completion>,
    pub scheduler: HandlerCaller,
    pub handlers: Handlers,
    pub counters: watch::Sender<DispatchCounters>,
}

impl Executor {
    pub async fn run(mut self, handlers_ready: Vec<ReadyWaiter>, ready: ReadySignal, cancel: CancellationToken) {
        if wait_all(handlers_ready).await.is_err() {
            warn!("Command handlers went away before startup");
            return;
        }
        ready.raise();
        info!("Command executor started");

        let mut completions_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Command executor cancelled");
                    break;
                }
                completion = self.completions.recv(Wait::Forever), if completions_open => match completion {
                    Ok(completion) => self.record_completion(completion),
                    Err(_) => completions_open = false,
                },
                frame = self.inbound.recv(Wait::Forever) => match frame {
                    Ok(frame) => self.execute(frame).await,
                    Err(ChannelError::Closed) => {
                        debug!("Command sources gone");
                        break;
                    }
                    Err(e) => warn!("Command executor receive failed: {}", e),
                },
            }
        }

        let c = *self.counters.borrow();
        info!(
            "Command executor ended ({} succeeded, {} failed, {} invalid APIDs)",
            c.succeeded, c.failed, c.invalid_apid
        );
    }

    async fn execute(&mut self, frame: CommandTransferFrame) {
        match frame.timing() {
            Ok(Timing::Immediate) => self.dispatch(frame).await,
            Ok(Timing::Absolute) => match self.scheduler.call(frame).await {
                Ok(status) => debug!("Scheduler accepted command: {:?}", status),
                Err(e) => warn!("Scheduler unavailable, dropping ATC command: {}", e),
            },
            Err(e) => warn!("Dropping command APID {:#05x}: {}", frame.apid, e),
        }
    }

    async fn dispatch(&mut self, frame: CommandTransferFrame) {
        let Some(destination) = Destination::from_apid(frame.apid) else {
            self.counters.send_modify(|c| c.invalid_apid = c.invalid_apid.wrapping_add(1));
            warn!("Unknown destination APID {:#05x}", frame.apid);
            return;
        };
        self.counters.send_modify(|c| c.valid_apid = c.valid_apid.wrapping_add(1));

        let status = match self.handlers.get(destination).call(frame).await {
            Ok(status) => status,
            Err(e) => {
                warn!("{} handler unavailable: {}", destination.name(), e);
                ExecStatus::Fail
            }
        };
        info!(
            "{} command {:#06x} arg {} -> {:?}",
            destination.name(),
            frame.packet_name,
            frame.argument,
            status
        );
        self.count(status);
    }

    fn record_completion(&mut self, completion: Completion) {
        info!(
            "{} command {:#06x} completed: {:?}",
            completion.destination.name(),
            completion.packet_name,
            completion.status
        );
        self.count(completion.status);
    }

    fn count(&self, status: ExecStatus) {
        match status {
            ExecStatus::Success => self.counters.send_modify(|c| c.succeeded = c.succeeded.wrapping_add(1)),
            ExecStatus::Fail => self.counters.send_modify(|c| c.failed = c.failed.wrapping_add(1)),
            ExecStatus::InProgress => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;
    use crate::command::HandlerInbox;
    use crate::fabric::{Sender, bounded, endpoint, readiness};

    struct Harness {
        inbound: Sender<CommandTransferFrame>,
        completions: Sender<Completion>,
        scheduler: HandlerInbox,
        software: HandlerInbox,
        imaging: HandlerInbox,
        counters: watch::Receiver<DispatchCounters>,
        cancel: CancellationToken,
        _others: (HandlerInbox, HandlerInbox),
    }

    fn harness() -> Harness {
        let (inbound, inbound_rx) = bounded(4);
        let (completions, completions_rx) = bounded(4);
        let (scheduler, scheduler_inbox) = endpoint(4);
        let (software, software_inbox) = endpoint(4);
        let (imaging, imaging_inbox) = endpoint(4);
        let (magnetometer, mag_inbox) = endpoint(4);
        let (relay, relay_inbox) = endpoint(4);
        let (counters, counters_rx) = watch::channel(DispatchCounters::default());
        let (ready, _waiter) = readiness();
        let cancel = CancellationToken::new();

        let executor = Executor {
            inbound: inbound_rx,
            completions: completions_rx,
            scheduler,
            handlers: Handlers { software, imaging, magnetometer, relay },
            counters,
        };
        tokio::spawn(executor.run(vec![], ready, cancel.clone()));

        Harness {
            inbound,
            completions,
            scheduler: scheduler_inbox,
            software: software_inbox,
            imaging: imaging_inbox,
            counters: counters_rx,
            cancel,
            _others: (mag_inbox, relay_inbox),
        }
    }

    fn frame(apid: u16, atc_flag: u8) -> CommandTransferFrame {
        CommandTransferFrame { apid, packet_name: 0, atc_flag, execution_time: MissionTime::new(5, 0), argument: 0 }
    }

    #[tokio::test]
    async fn immediate_frames_skip_the_scheduler() {
        let mut h = harness();
        h.inbound.send(frame(0x000, 0), Wait::Forever).await.unwrap();

        let call = h.software.recv(Wait::Forever).await.unwrap();
        assert_eq!(call.request().apid, 0x000);
        call.reply(ExecStatus::Success);

        let mut counters = h.counters.clone();
        counters.wait_for(|c| c.succeeded == 1).await.unwrap();
        assert!(matches!(
            h.scheduler.recv(Wait::For(std::time::Duration::from_millis(50))).await,
            Err(ChannelError::Timeout)
        ));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn atc_frames_go_to_the_scheduler() {
        let mut h = harness();
        h.inbound.send(frame(0x064, 1), Wait::Forever).await.unwrap();

        let call = h.scheduler.recv(Wait::Forever).await.unwrap();
        assert_eq!(call.request().atc_flag, 1);
        call.reply(ExecStatus::Success);

        assert!(matches!(
            h.imaging.recv(Wait::For(std::time::Duration::from_millis(50))).await,
            Err(ChannelError::Timeout)
        ));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn bad_atc_and_unknown_apid_make_no_call() {
        let mut h = harness();
        h.inbound.send(frame(0x000, 2), Wait::Forever).await.unwrap();
        h.inbound.send(frame(0x555, 0), Wait::Forever).await.unwrap();

        let mut counters = h.counters.clone();
        counters.wait_for(|c| c.invalid_apid == 1).await.unwrap();
        assert!(matches!(
            h.software.recv(Wait::For(std::time::Duration::from_millis(50))).await,
            Err(ChannelError::Timeout)
        ));
        assert_eq!(h.counters.borrow().valid_apid, 0);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn in_progress_counts_on_completion() {
        let mut h = harness();
        h.inbound.send(frame(0x064, 0), Wait::Forever).await.unwrap();
        let call = h.imaging.recv(Wait::Forever).await.unwrap();
        call.reply(ExecStatus::InProgress);

        let mut counters = h.counters.clone();
        counters.wait_for(|c| c.valid_apid == 1).await.unwrap();
        assert_eq!(h.counters.borrow().succeeded, 0);

        h.completions
            .send(
                Completion { destination: Destination::Imaging, packet_name: 0, status: ExecStatus::Success },
                Wait::Forever,
            )
            .await
            .unwrap();
        counters.wait_for(|c| c.succeeded == 1).await.unwrap();
        h.cancel.cancel();
    }
}
