//! Mission time as carried in packet T-fields.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Unix time split into the seconds/milliseconds pair used on the wire.
///
/// Field order makes the derived `Ord` temporal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MissionTime {
    pub seconds: u32,
    pub millis: u16,
}

impl MissionTime {
    pub fn new(seconds: u32, millis: u16) -> Self {
        Self { seconds, millis }
    }

    /// Build from milliseconds since the Unix epoch. Seconds wrap at `u32`.
    pub fn from_unix_millis(ms: u64) -> Self {
        Self { seconds: (ms / 1000) as u32, millis: (ms % 1000) as u16 }
    }

    pub fn as_unix_millis(&self) -> u64 {
        u64::from(self.seconds) * 1000 + u64::from(self.millis)
    }

    /// Signed distance in whole seconds from `other` to `self`.
    pub fn seconds_since(&self, other: MissionTime) -> i64 {
        i64::from(self.seconds) - i64::from(other.seconds)
    }
}

impl std::fmt::Display for MissionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.seconds, self.millis)
    }
}

/// Wall clock anchored to the tokio clock.
///
/// `now()` advances with `tokio::time::Instant`, so a paused test runtime
/// drives mission time and timers together.
#[derive(Debug, Clone, Copy)]
pub struct MissionClock {
    base_ms: u64,
    anchor: Instant,
}

impl MissionClock {
    /// Clock that reads the system wall time at creation.
    pub fn system() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self { base_ms, anchor: Instant::now() }
    }

    /// Clock that reads `start` now.
    pub fn starting_at(start: MissionTime) -> Self {
        Self { base_ms: start.as_unix_millis(), anchor: Instant::now() }
    }

    pub fn now(&self) -> MissionTime {
        let elapsed = self.anchor.elapsed().as_millis() as u64;
        MissionTime::from_unix_millis(self.base_ms + elapsed)
    }

    /// Time left until `target`, zero if it has passed.
    pub fn until(&self, target: MissionTime) -> Duration {
        let now = self.now().as_unix_millis();
        Duration::from_millis(target.as_unix_millis().saturating_sub(now))
    }
}

impl Default for MissionClock {
    fn default() -> Self {
        Self::system()
    }
}
