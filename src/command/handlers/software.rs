//! Software (APID 0x000) commands: no-op, playback, filter mode.

use tracing::{info, warn};

use super::{CommandHandler, unknown_name};
use crate::archive::{Category, PlaybackCaller};
use crate::codec::CommandTransferFrame;
use crate::command::{ExecStatus, names};
use crate::fabric::Sender;
use crate::telemetry::filter::Mode;

pub struct SoftwareHandler {
    pub playback: PlaybackCaller,
    pub filter_control: Sender<Mode>,
}

#[async_trait::async_trait]
impl CommandHandler for SoftwareHandler {
    fn name(&self) -> &'static str {
        "software"
    }

    async fn handle(&mut self, frame: CommandTransferFrame) -> ExecStatus {
        match frame.packet_name {
            names::SW_NOOP => ExecStatus::Success,
            names::SW_PLAYBACK => {
                let Some(category) = Category::from_selector(frame.argument) else {
                    warn!("Invalid playback selector {}", frame.argument);
                    return ExecStatus::Fail;
                };
                info!("Playback of {} requested", category.dir_name());
                match self.playback.call(category).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!("Playback unavailable: {}", e);
                        ExecStatus::Fail
                    }
                }
            }
            names::SW_SET_MODE => {
                let Some(mode) = Mode::from_index(frame.argument) else {
                    warn!("Invalid filter mode {}", frame.argument);
                    return ExecStatus::Fail;
                };
                match self.filter_control.try_send(mode) {
                    Ok(()) => ExecStatus::Success,
                    Err(e) => {
                        warn!("Filter mode change to {:?} not delivered: {}", mode, e);
                        ExecStatus::Fail
                    }
                }
            }
            _ => unknown_name(self.name(), &frame),
        }
    }
}
