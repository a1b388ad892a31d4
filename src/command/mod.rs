//! Command pipeline
//!
//! Uplinked telecommands flow through four stages:
//!
//! ```text
//! uplink bytes -> receiver -> processor -> executor -> handler
//!                                             |  ^
//!                                             v  | (ATC released)
//!                                          scheduler
//! ```
//!
//! The processor decodes and validates packets, the executor routes each
//! [`CommandTransferFrame`] by its ATC flag and destination APID, and each
//! subsystem handler answers with an [`ExecStatus`] through a synchronous
//! call. Handlers that answer [`ExecStatus::InProgress`] report the final
//! outcome later on the completion channel.

pub mod executor;
pub mod handlers;
pub mod processor;
pub mod receiver;
pub mod scheduler;

pub use executor::{DispatchCounters, Executor};
pub use processor::{CommandProcessor, UplinkCounters};
pub use receiver::UplinkReceiver;
pub use scheduler::Scheduler;

use crate::codec::CommandTransferFrame;
use crate::fabric::{Caller, Inbox};

/// Command destinations and their APIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Software,
    Imaging,
    Magnetometer,
    Relay,
}

impl Destination {
    pub const ALL: [Destination; 4] =
        [Destination::Software, Destination::Imaging, Destination::Magnetometer, Destination::Relay];

    pub fn apid(self) -> u16 {
        match self {
            Destination::Software => 0x000,
            Destination::Imaging => 0x064,
            Destination::Magnetometer => 0x0C8,
            Destination::Relay => 0x12C,
        }
    }

    pub fn from_apid(apid: u16) -> Option<Self> {
        Destination::ALL.into_iter().find(|d| d.apid() == apid)
    }

    pub fn name(self) -> &'static str {
        match self {
            Destination::Software => "software",
            Destination::Imaging => "imaging",
            Destination::Magnetometer => "magnetometer",
            Destination::Relay => "relay",
        }
    }
}

/// Packet names understood by the handlers.
pub mod names {
    pub const SW_NOOP: u16 = 0x0000;
    pub const SW_PLAYBACK: u16 = 0x0001;
    pub const SW_SET_MODE: u16 = 0x0002;

    pub const IMG_BEGIN: u16 = 0x0000;
    pub const IMG_HALT: u16 = 0x0001;
    pub const IMG_NOOP: u16 = 0x3FFF;

    pub const MDQ_BEGIN: u16 = 0x0000;
    pub const MDQ_HALT: u16 = 0x0001;
    pub const MDQ_NOOP: u16 = 0x3FFF;

    pub const RELAY_MAG_ON: u16 = 0x0000;
    pub const RELAY_MAG_OFF: u16 = 0x0001;
    pub const RELAY_NOOP: u16 = 0x3FFF;
}

/// Status a handler reports for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Fail,
    /// Accepted; the final status follows on the completion channel.
    InProgress,
}

impl ExecStatus {
    /// Wire status code: 1 success, 0 fail, -1 in progress.
    pub fn code(self) -> i32 {
        match self {
            ExecStatus::Success => 1,
            ExecStatus::Fail => 0,
            ExecStatus::InProgress => -1,
        }
    }
}

/// Final outcome of a command that first replied in-progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub destination: Destination,
    pub packet_name: u16,
    pub status: ExecStatus,
}

pub type HandlerCaller = Caller<CommandTransferFrame, ExecStatus>;
pub type HandlerInbox = Inbox<CommandTransferFrame, ExecStatus>;

/// Calling ends of every subsystem handler.
#[derive(Debug, Clone)]
pub struct Handlers {
    pub software: HandlerCaller,
    pub imaging: HandlerCaller,
    pub magnetometer: HandlerCaller,
    pub relay: HandlerCaller,
}

impl Handlers {
    pub fn get(&self, destination: Destination) -> &HandlerCaller {
        match destination {
            Destination::Software => &self.software,
            Destination::Imaging => &self.imaging,
            Destination::Magnetometer => &self.magnetometer,
            Destination::Relay => &self.relay,
        }
    }
}
