//! Magnetometer (APID 0x0C8) commands.
//!
//! The handler owns the scan flag. Beginning a scan while scanning, or halting
//! while idle, is refused without touching the device. The flag is published
//! so the DAQ reader knows when to pull packets.

use tokio::sync::watch;
use tracing::{info, warn};

use super::{CommandHandler, unknown_name};
use crate::codec::CommandTransferFrame;
use crate::collaborators::MagnetometerControl;
use crate::command::{ExecStatus, names};
use crate::error::CommandError;

pub struct MagnetometerHandler {
    pub control: Box<dyn MagnetometerControl>,
    pub scanning: watch::Sender<bool>,
}

impl MagnetometerHandler {
    async fn begin(&mut self) -> Result<(), CommandError> {
        if *self.scanning.borrow() {
            return Err(CommandError::refused("magnetometer", "already scanning"));
        }
        self.control
            .send_command("start 0")
            .await
            .map_err(|e| CommandError::refused("magnetometer", e.to_string()))?;
        self.scanning.send_replace(true);
        Ok(())
    }

    async fn halt(&mut self) -> Result<(), CommandError> {
        if !*self.scanning.borrow() {
            return Err(CommandError::refused("magnetometer", "not scanning"));
        }
        self.control.send_command("stop").await.map_err(|e| CommandError::refused("magnetometer", e.to_string()))?;
        self.scanning.send_replace(false);
        if let Err(e) = self.control.send_command("led 6").await {
            warn!("Magnetometer LED reset failed: {}", e);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandHandler for MagnetometerHandler {
    fn name(&self) -> &'static str {
        "magnetometer"
    }

    async fn handle(&mut self, frame: CommandTransferFrame) -> ExecStatus {
        let result = match frame.packet_name {
            names::MDQ_BEGIN => self.begin().await,
            names::MDQ_HALT => self.halt().await,
            names::MDQ_NOOP => Ok(()),
            _ => return unknown_name(self.name(), &frame),
        };
        match result {
            Ok(()) => {
                info!("Magnetometer scanning: {}", *self.scanning.borrow());
                ExecStatus::Success
            }
            Err(e) => {
                warn!("{}", e);
                ExecStatus::Fail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;
    use crate::sim::SimMagnetometer;

    fn frame(name: u16) -> CommandTransferFrame {
        CommandTransferFrame { apid: 0xC8, packet_name: name, atc_flag: 0, execution_time: MissionTime::default(), argument: 0 }
    }

    #[tokio::test]
    async fn scan_flag_gates_begin_and_halt() {
        let sim = SimMagnetometer::new(16);
        let (scanning, scan_rx) = watch::channel(false);
        let mut handler = MagnetometerHandler { control: Box::new(sim.control()), scanning };

        assert_eq!(handler.handle(frame(names::MDQ_HALT)).await, ExecStatus::Fail);
        assert_eq!(handler.handle(frame(names::MDQ_BEGIN)).await, ExecStatus::Success);
        assert!(*scan_rx.borrow());
        assert_eq!(handler.handle(frame(names::MDQ_BEGIN)).await, ExecStatus::Fail);
        assert_eq!(handler.handle(frame(names::MDQ_NOOP)).await, ExecStatus::Success);
        assert_eq!(handler.handle(frame(names::MDQ_HALT)).await, ExecStatus::Success);
        assert!(!*scan_rx.borrow());
        assert_eq!(handler.handle(frame(0x0042)).await, ExecStatus::Fail);

        // refused commands never reach the device
        assert_eq!(sim.commands(), vec!["start 0", "stop", "led 6"]);
    }
}
