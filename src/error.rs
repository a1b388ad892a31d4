//! Error types for the command and data handling core.
//!
//! Nothing in this crate is globally fatal: every error is recoverable at the
//! task that observes it. Tasks log the error, drop the offending frame or
//! reject the command, and go back to their inbound channel.
//!
//! ## Error Categories
//!
//! - **Codec Errors**: malformed or truncated packet bytes; the frame is dropped
//! - **Channel Errors**: timeouts (a control signal, not a failure), full
//!   queues (retry-then-drop) and closed channels (peer task gone)
//! - **Command Errors**: unknown packet names, bad ATC flags, and commands the
//!   device state forbids; rejected with a fail status
//! - **Archive Errors**: filesystem failures and image segments that arrive
//!   without an open container
//! - **Collaborator Errors**: I/O failures from serial ports, instruments,
//!   and the image processor
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use cdh::CdhError;
//!
//! let error = CdhError::collaborator_failed("downlink", "serial port closed");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for C&DH operations.
pub type Result<T, E = CdhError> = std::result::Result<T, E>;

/// Malformed or truncated bytes at the packet/frame codec boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated {what}: need {expected} bytes, got {actual}")]
    Truncated { what: &'static str, expected: usize, actual: usize },

    #[error("Payload of {len} bytes exceeds the {max}-byte user data field")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Field '{field}' value {value} does not fit in {bits} bits")]
    FieldOverflow { field: &'static str, value: u32, bits: u32 },

    #[error("APID {apid:#05x} is reserved for idle packets")]
    ReservedApid { apid: u16 },

    #[error("Unexpected {field}: expected {expected}, found {found}")]
    UnexpectedField { field: &'static str, expected: u32, found: u32 },
}

/// Outcome of a bounded wait on a channel that did not yield a message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The wait elapsed with nothing to receive. Used for polling and is not
    /// a failure.
    #[error("Timed out waiting on channel")]
    Timeout,

    /// The channel stayed at capacity for the whole send window.
    #[error("Channel capacity exceeded")]
    Full,

    /// The task on the other end has gone away.
    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    /// True for the non-error polling outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }
}

/// Rejected commands. Both variants are reported upstream as a fail status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("{device} refused command: {reason}")]
    DeviceRefused { device: &'static str, reason: String },
}

impl CommandError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        CommandError::InvalidCommand { reason: reason.into() }
    }

    pub fn refused(device: &'static str, reason: impl Into<String>) -> Self {
        CommandError::DeviceRefused { device, reason: reason.into() }
    }
}

/// Archive write and playback failures.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive file error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A continuation or last image segment arrived with no open container.
    #[error("Image segment ({grouping}) has no open container")]
    SegmentWithoutContainer { grouping: &'static str },

    #[error("Unknown playback category {selector}")]
    UnknownCategory { selector: u32 },

    #[error("No archive category for APID {apid:#05x}")]
    UncategorizedApid { apid: u16 },
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io { path: path.into(), source }
    }
}

/// Main error type for C&DH operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CdhError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("{collaborator} failure: {reason}")]
    Collaborator {
        collaborator: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

impl CdhError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CdhError::Channel(ChannelError::Timeout) => true,
            CdhError::Channel(ChannelError::Full) => true,
            CdhError::Channel(ChannelError::Closed) => false,
            CdhError::Collaborator { .. } => true,
            CdhError::Archive(ArchiveError::Io { .. }) => true,
            CdhError::Archive(_) => false,
            CdhError::Codec(_) => false,
            CdhError::Command(_) => false,
            CdhError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            CdhError::Codec(_) => vec![
                "Check ground segment packet builder version",
                "Verify uplink framing is byte aligned",
            ],
            CdhError::Channel(ChannelError::Timeout) => {
                vec!["Poll the next source", "Increase the wait window if data is expected"]
            }
            CdhError::Channel(ChannelError::Full) => vec![
                "Retry after the consumer drains its queue",
                "Increase queue capacity in the configuration",
            ],
            CdhError::Channel(ChannelError::Closed) => {
                vec!["Check that the consuming task is still running", "Restart the flight software"]
            }
            CdhError::Command(CommandError::InvalidCommand { .. }) => vec![
                "Check the command database for the packet name",
                "Verify the destination APID",
            ],
            CdhError::Command(CommandError::DeviceRefused { .. }) => vec![
                "Query housekeeping for the device state",
                "Send the opposite command first",
            ],
            CdhError::Archive(ArchiveError::Io { .. }) => vec![
                "Check archive directory permissions",
                "Ensure sufficient storage space",
            ],
            CdhError::Archive(ArchiveError::SegmentWithoutContainer { .. }) => vec![
                "Check that image segments arrive in first/continuation/last order",
                "Inspect the image container listing files",
            ],
            CdhError::Archive(ArchiveError::UnknownCategory { .. }) => {
                vec!["Use playback selector 0 (HK), 1 (MAG) or 2 (IMG)"]
            }
            CdhError::Archive(ArchiveError::UncategorizedApid { .. }) => {
                vec!["Remove the archive column from the filter row for this APID"]
            }
            CdhError::Collaborator { .. } => vec![
                "Check device cabling and power",
                "Power cycle the device through the relay switch",
            ],
            CdhError::Config { .. } => vec![
                "Check the YAML configuration against the defaults",
                "Ensure filter table frequencies do not exceed their ranges",
            ],
        }
    }

    /// Helper constructor for collaborator failures.
    pub fn collaborator_failed(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        CdhError::Collaborator { collaborator: collaborator.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for collaborator failures with source.
    pub fn collaborator_failed_with_source(
        collaborator: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        CdhError::Collaborator {
            collaborator: collaborator.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        CdhError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for CdhError {
    fn from(err: std::io::Error) -> Self {
        CdhError::Collaborator { collaborator: "io".to_string(), reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<serde_yaml_ng::Error> for CdhError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        CdhError::Config { reason: err.to_string() }
    }
}
