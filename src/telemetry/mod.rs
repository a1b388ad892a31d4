//! Telemetry side of the flight software.
//!
//! ```text
//! housekeeping ─┐
//! mag reader ───┼─> packetizer ─> filter engine ─┬─> downlink
//! image pipeline┘                                └─> archive
//! ```

pub mod downlink;
pub mod filter;
pub mod housekeeping;
pub mod instruments;
pub mod packetizer;

pub use downlink::Downlink;
pub use filter::{Decimation, FilterEngine, FilterRow, FilterTable, Mode, Route};
pub use housekeeping::{Housekeeping, HousekeepingSnapshot};
pub use instruments::{ImageCounters, ImagePipeline, MagnetometerReader};
pub use packetizer::{Packetizer, SequenceCounter};
