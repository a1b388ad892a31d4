//! Flight software configuration.
//!
//! Loaded from YAML with `serde_yaml_ng`. Every field has a default matching
//! the flight constants, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::Destination;
use crate::telemetry::filter::{Decimation, FilterRow, Mode};
use crate::{CdhError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FswConfig {
    /// Capacity of every inter-task queue, in messages.
    pub queue_capacity: usize,
    /// Packetizer polling window per telemetry source.
    pub poll_window_ms: u64,
    /// Delay before the single forward retry on a full queue.
    pub retry_delay_ms: u64,
    pub housekeeping_period_ms: u64,
    pub imaging_interval_secs: u64,
    /// Commands whose execution time is further in the past are invalid.
    pub exec_time_tolerance_secs: u32,
    /// Largest raw or processed image accepted, in bytes.
    pub max_image_bytes: usize,
    pub archive_root: PathBuf,
    pub filter_table: FilterTableConfig,
}

impl Default for FswConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            poll_window_ms: 500,
            retry_delay_ms: 350,
            housekeeping_period_ms: 1000,
            imaging_interval_secs: 60,
            exec_time_tolerance_secs: 20,
            max_image_bytes: 2_304_000,
            archive_root: PathBuf::from("raw_record_tlm"),
            filter_table: FilterTableConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterTableConfig {
    pub initial_mode: Mode,
    pub rows: Vec<FilterRow>,
}

impl Default for FilterTableConfig {
    fn default() -> Self {
        Self { initial_mode: Mode::Normal, rows: flight_filter_rows() }
    }
}

/// Flight tables. Columns: normal, realtime, playback, imaging, magnetometer.
pub fn flight_filter_rows() -> Vec<FilterRow> {
    const A: Decimation = Decimation::ALWAYS;
    const N: Decimation = Decimation::NEVER;
    vec![
        FilterRow { apid: Destination::Software.apid(), downlink: vec![A, A, A, A, A], archive: vec![A, N, A, A, A] },
        FilterRow { apid: Destination::Imaging.apid(), downlink: vec![A, A, N, A, N], archive: vec![A, N, A, A, N] },
        FilterRow {
            apid: Destination::Magnetometer.apid(),
            downlink: vec![A, A, N, N, A],
            archive: vec![A, N, A, N, A],
        },
    ]
}

impl FswConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FswConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| CdhError::config_error(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(CdhError::config_error("queue_capacity must be at least 1"));
        }
        if self.max_image_bytes == 0 {
            return Err(CdhError::config_error("max_image_bytes must be at least 1"));
        }

        let mut seen = HashSet::new();
        for row in &self.filter_table.rows {
            if !seen.insert(row.apid) {
                return Err(CdhError::config_error(format!("duplicate filter row for APID {:#05x}", row.apid)));
            }
            for (dest, columns) in [("downlink", &row.downlink), ("archive", &row.archive)] {
                if columns.len() > Mode::ALL.len() {
                    return Err(CdhError::config_error(format!(
                        "APID {:#05x} {} has {} columns, at most {}",
                        row.apid,
                        dest,
                        columns.len(),
                        Mode::ALL.len()
                    )));
                }
                if let Some(d) = columns.iter().find(|d| d.frequency > d.range) {
                    return Err(CdhError::config_error(format!(
                        "APID {:#05x} {} frequency {} exceeds range {}",
                        row.apid, dest, d.frequency, d.range
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn housekeeping_period(&self) -> Duration {
        Duration::from_millis(self.housekeeping_period_ms)
    }

    pub fn imaging_interval(&self) -> Duration {
        Duration::from_secs(self.imaging_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_flight_defaults() {
        let config = FswConfig::from_yaml("{}").unwrap();
        assert_eq!(config, FswConfig::default());
        assert_eq!(config.retry_delay(), Duration::from_millis(350));
        assert_eq!(config.filter_table.rows.len(), 3);
    }

    #[test]
    fn partial_rows_leave_modes_unpopulated() {
        let yaml = r#"
queue_capacity: 4
filter_table:
  initial_mode: realtime
  rows:
    - apid: 0
      downlink:
        - { range: 4, frequency: 1 }
        - { range: 1, frequency: 1 }
"#;
        let config = FswConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.filter_table.initial_mode, Mode::Realtime);
        let row = &config.filter_table.rows[0];
        assert_eq!(row.downlink_for(Mode::Normal), Decimation::new(4, 1));
        assert_eq!(row.downlink_for(Mode::Imaging), Decimation::NEVER);
        assert_eq!(row.archive_for(Mode::Normal), Decimation::NEVER);
    }

    #[test]
    fn frequency_above_range_is_rejected() {
        let yaml = r#"
filter_table:
  rows:
    - apid: 0
      archive: [{ range: 2, frequency: 3 }]
"#;
        let err = FswConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CdhError::Config { .. }));
        assert!(err.to_string().contains("exceeds range"));
    }

    #[test]
    fn duplicate_apids_are_rejected() {
        let mut config = FswConfig::default();
        config.filter_table.rows.push(FilterRow { apid: 0xC8, downlink: vec![], archive: vec![] });
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn zero_image_limit_is_rejected() {
        let err = FswConfig::from_yaml("max_image_bytes: 0").unwrap_err();
        assert!(err.to_string().contains("max_image_bytes"));
        assert_eq!(FswConfig::default().max_image_bytes, 2_304_000);
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = FswConfig::from_yaml("queue_capacity: [").unwrap_err();
        assert!(matches!(err, CdhError::Config { .. }));
    }

    #[test]
    fn yaml_round_trip() {
        let config = FswConfig::default();
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert_eq!(FswConfig::from_yaml(&yaml).unwrap(), config);
    }
}
