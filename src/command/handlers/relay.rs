//! Electrical relay (APID 0x12C) commands.

use tracing::{info, warn};

use super::{CommandHandler, unknown_name};
use crate::codec::CommandTransferFrame;
use crate::collaborators::RelaySwitch;
use crate::command::{ExecStatus, names};

pub struct RelayHandler {
    pub relay: Box<dyn RelaySwitch>,
}

#[async_trait::async_trait]
impl CommandHandler for RelayHandler {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn handle(&mut self, frame: CommandTransferFrame) -> ExecStatus {
        let on = match frame.packet_name {
            names::RELAY_MAG_ON => true,
            names::RELAY_MAG_OFF => false,
            names::RELAY_NOOP => return ExecStatus::Success,
            _ => return unknown_name(self.name(), &frame),
        };
        match self.relay.set_magnetometer_power(on).await {
            Ok(()) => {
                info!("Magnetometer power {}", if on { "on" } else { "off" });
                ExecStatus::Success
            }
            Err(e) => {
                warn!("Relay switch failed: {}", e);
                ExecStatus::Fail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;
    use crate::sim::SimRelay;

    fn frame(name: u16) -> CommandTransferFrame {
        CommandTransferFrame { apid: 0x12C, packet_name: name, atc_flag: 0, execution_time: MissionTime::default(), argument: 0 }
    }

    #[tokio::test]
    async fn switches_power() {
        let relay = SimRelay::default();
        let mut handler = RelayHandler { relay: Box::new(relay.clone()) };

        assert_eq!(handler.handle(frame(names::RELAY_MAG_ON)).await, ExecStatus::Success);
        assert!(relay.is_on());
        assert_eq!(handler.handle(frame(names::RELAY_NOOP)).await, ExecStatus::Success);
        assert!(relay.is_on());
        assert_eq!(handler.handle(frame(names::RELAY_MAG_OFF)).await, ExecStatus::Success);
        assert!(!relay.is_on());
        assert_eq!(handler.handle(frame(0x0002)).await, ExecStatus::Fail);
    }
}
