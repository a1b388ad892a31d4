//! File-backed telemetry archive and playback.
//!
//! ## On-disk layout
//!
//! ```text
//! <root>/hk/<sec>_<ms>.bin           housekeeping transfer frames
//! <root>/hk/hk_dir.ls                ordered listing
//! <root>/mdq/<sec>_<ms>.bin          magnetometer transfer frames
//! <root>/mdq/mdq_dir.ls
//! <root>/img/<sec>_<ms>/<n>.bin      image segments, n = 1, 2, ...
//! <root>/img/<sec>_<ms>_dir.ls       segment listing of one image
//! <root>/img/img_dir.ls              image container listing
//! ```
//!
//! Each `.bin` holds one complete 1089-byte transfer frame. Listings are
//! newline-separated names, oldest first, regenerated after every write by
//! re-enumerating the directory and sorting on the numeric time key.

pub mod playback;
pub mod store;

pub use playback::Playback;
pub use store::{ArchiveReader, ArchiveStore, ArchiveWriter};

use crate::command::{Destination, ExecStatus};
use crate::fabric::Caller;

pub type PlaybackCaller = Caller<Category, ExecStatus>;

/// Archive categories, one per telemetry origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Housekeeping,
    Magnetometer,
    Image,
}

impl Category {
    /// Playback selector: 0 housekeeping, 1 magnetometer, 2 image.
    pub fn from_selector(selector: u32) -> Option<Self> {
        match selector {
            0 => Some(Category::Housekeeping),
            1 => Some(Category::Magnetometer),
            2 => Some(Category::Image),
            _ => None,
        }
    }

    pub fn from_apid(apid: u16) -> Option<Self> {
        match Destination::from_apid(apid)? {
            Destination::Software => Some(Category::Housekeeping),
            Destination::Magnetometer => Some(Category::Magnetometer),
            Destination::Imaging => Some(Category::Image),
            Destination::Relay => None,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Housekeeping => "hk",
            Category::Magnetometer => "mdq",
            Category::Image => "img",
        }
    }

    pub fn listing_name(self) -> String {
        format!("{}_dir.ls", self.dir_name())
    }
}

/// Parse a `<sec>_<ms>` time key into a sortable pair.
fn parse_time_key(key: &str) -> Option<(u32, u16)> {
    let (sec, ms) = key.split_once('_')?;
    Some((sec.parse().ok()?, ms.parse().ok()?))
}

fn time_key(time: crate::clock::MissionTime) -> String {
    format!("{}_{}", time.seconds, time.millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(Category::from_apid(0x000), Some(Category::Housekeeping));
        assert_eq!(Category::from_apid(0x0C8), Some(Category::Magnetometer));
        assert_eq!(Category::from_apid(0x064), Some(Category::Image));
        assert_eq!(Category::from_apid(0x12C), None);
        assert_eq!(Category::from_selector(3), None);
        assert_eq!(Category::Magnetometer.listing_name(), "mdq_dir.ls");
    }

    #[test]
    fn time_keys_sort_numerically() {
        let mut keys = vec!["100_40", "100_5", "99_999", "1000_0"];
        keys.sort_by_key(|k| parse_time_key(k));
        assert_eq!(keys, vec!["99_999", "100_5", "100_40", "1000_0"]);
        assert_eq!(parse_time_key("hk_dir"), None);
    }
}
