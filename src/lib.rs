//! Command and data handling core for a small-satellite payload controller.
//!
//! The core receives telecommands from an uplink byte stream, validates them,
//! executes them immediately or at an absolute time, and drives the payload
//! subsystems (imaging camera, magnetometer DAQ, electrical relay). It
//! packetizes housekeeping, magnetometer and image data as CCSDS-style
//! telemetry, routes every frame through a mode-dependent filter table to the
//! downlink and to an on-disk archive, and replays archived telemetry on
//! command.
//!
//! # Features
//!
//! - **Packet codec**: fixed-size telemetry packets, transfer frames and
//!   telecommands with bit-exact little-endian layouts
//! - **Message fabric**: bounded channels with timeouts, synchronous calls
//!   and startup readiness barriers
//! - **Command pipeline**: validation, absolute-time scheduling and subsystem
//!   dispatch with eventual status reporting
//! - **Filter table**: per-APID, per-mode decimation to downlink and archive
//! - **Archive**: time-ordered storage with image segment containers and
//!   playback
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cdh::{Collaborators, FlightSoftware, FswConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (uplink, _ground_uplink) = tokio::io::duplex(4096);
//!     let (downlink, _ground_downlink) = tokio::io::duplex(64 * 1024);
//!
//!     let fsw = FlightSoftware::spawn(FswConfig::default(), Collaborators::simulated(uplink, downlink))?;
//!     fsw.ready().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     fsw.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod clock;
pub mod config;
mod error;

// Wire formats and messaging
pub mod codec;
pub mod fabric;

// Flight software tasks
pub mod archive;
pub mod command;
pub mod runtime;
pub mod telemetry;

// Device seams
pub mod collaborators;
pub mod sim;

// Core exports
pub use clock::{MissionClock, MissionTime};
pub use config::FswConfig;
pub use error::*;

// Task graph exports
pub use runtime::{Collaborators, FlightSoftware, FlightSoftwareHandle};
