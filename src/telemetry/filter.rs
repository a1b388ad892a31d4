//! Filter table engine
//!
//! Decides per telemetry transfer frame whether it goes to the downlink (TO),
//! the archive (DS), both, or neither. Each origin APID has a row holding a
//! `(range, frequency)` pair per operating mode and destination.
//!
//! The per-destination decision is a stateful decimation, not a modulo:
//!
//! 1. On a mode change, both counters of the row reset to their frequency.
//! 2. Frequency 0 never forwards.
//! 3. `counter == frequency` forwards, then increments unless `counter == range`.
//! 4. `counter == range` withholds and wraps the counter back to frequency.
//! 5. Anything else withholds and increments.
//!
//! The engine task is the only owner of the counters; mode changes arrive as
//! messages on its control channel.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::TelemetryTransferFrame;
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Receiver, Sender, Wait, forward_with_retry, wait_all};

/// Operating modes, in table column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Normal,
    Realtime,
    Playback,
    Imaging,
    Magnetometer,
}

impl Mode {
    pub const ALL: [Mode; 5] =
        [Mode::Normal, Mode::Realtime, Mode::Playback, Mode::Imaging, Mode::Magnetometer];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u32) -> Option<Mode> {
        Mode::ALL.get(index as usize).copied()
    }
}

/// A `(range, frequency)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimation {
    pub range: u32,
    pub frequency: u32,
}

impl Decimation {
    pub const NEVER: Decimation = Decimation { range: 0, frequency: 0 };
    pub const ALWAYS: Decimation = Decimation { range: 1, frequency: 1 };

    pub const fn new(range: u32, frequency: u32) -> Self {
        Self { range, frequency }
    }
}

/// One filter table row. Missing mode columns read as [`Decimation::NEVER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRow {
    pub apid: u16,
    #[serde(default)]
    pub downlink: Vec<Decimation>,
    #[serde(default)]
    pub archive: Vec<Decimation>,
}

impl FilterRow {
    pub fn downlink_for(&self, mode: Mode) -> Decimation {
        self.downlink.get(mode.index()).copied().unwrap_or(Decimation::NEVER)
    }

    pub fn archive_for(&self, mode: Mode) -> Decimation {
        self.archive.get(mode.index()).copied().unwrap_or(Decimation::NEVER)
    }
}

/// Destinations chosen for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    pub downlink: bool,
    pub archive: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct RowState {
    downlink: u32,
    archive: u32,
    last_mode: Option<Mode>,
}

/// Advance one destination counter and report whether this frame is selected.
fn decimate(counter: &mut u32, d: Decimation) -> bool {
    if d.frequency == 0 {
        false
    } else if *counter == d.frequency {
        if *counter != d.range {
            *counter += 1;
        }
        true
    } else if *counter == d.range {
        *counter = d.frequency;
        false
    } else {
        *counter += 1;
        false
    }
}

/// Filter table with its counter state.
#[derive(Debug, Clone)]
pub struct FilterTable {
    rows: Vec<FilterRow>,
    state: Vec<RowState>,
    mode: Mode,
}

impl FilterTable {
    pub fn new(rows: Vec<FilterRow>, mode: Mode) -> Self {
        let state = vec![RowState::default(); rows.len()];
        Self { rows, state, mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch the active mode. Counters reset lazily on each row's next frame.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Route one frame from `apid`. `None` if no row matches.
    pub fn route(&mut self, apid: u16) -> Option<Route> {
        let index = self.rows.iter().position(|row| row.apid == apid)?;
        let row = &self.rows[index];
        let state = &mut self.state[index];

        let to = row.downlink_for(self.mode);
        let ds = row.archive_for(self.mode);

        if state.last_mode != Some(self.mode) {
            state.downlink = to.frequency;
            state.archive = ds.frequency;
            state.last_mode = Some(self.mode);
        }

        Some(Route {
            downlink: decimate(&mut state.downlink, to),
            archive: decimate(&mut state.archive, ds),
        })
    }
}

/// Filter engine task: owns the table and forwards frames to the sinks.
pub struct FilterEngine {
    pub table: FilterTable,
    pub frames: Receiver<TelemetryTransferFrame>,
    pub control: Receiver<Mode>,
    pub downlink: Sender<TelemetryTransferFrame>,
    pub archive: Sender<TelemetryTransferFrame>,
    pub retry_delay: Duration,
}

impl FilterEngine {
    pub async fn run(
        mut self,
        sinks_ready: Vec<ReadyWaiter>,
        ready: ReadySignal,
        cancel: CancellationToken,
    ) {
        if wait_all(sinks_ready).await.is_err() {
            warn!("Filter engine sinks went away before startup");
            return;
        }
        ready.raise();
        info!("Filter engine started in {:?} mode", self.table.mode());

        let mut forwarded = 0u64;
        let mut control_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Filter engine cancelled");
                    break;
                }
                mode = self.control.recv(Wait::Forever), if control_open => match mode {
                    Ok(mode) => {
                        info!("Filter mode {:?} -> {:?}", self.table.mode(), mode);
                        self.table.set_mode(mode);
                    }
                    Err(_) => control_open = false,
                },
                frame = self.frames.recv(Wait::Forever) => match frame {
                    Ok(frame) => {
                        if self.dispatch(frame).await {
                            forwarded += 1;
                        }
                    }
                    Err(ChannelError::Closed) => {
                        debug!("All telemetry producers gone");
                        break;
                    }
                    Err(e) => warn!("Filter receive failed: {}", e),
                },
            }
        }

        info!("Filter engine ended ({} frames forwarded)", forwarded);
    }

    async fn dispatch(&mut self, frame: TelemetryTransferFrame) -> bool {
        let Some(route) = self.table.route(frame.apid()) else {
            warn!("No filter row for APID {:#05x}, dropping frame", frame.apid());
            return false;
        };
        trace!("APID {:#05x} routed {:?}", frame.apid(), route);

        let mut sent = false;
        if route.downlink {
            sent |= forward_with_retry(&self.downlink, frame.clone(), self.retry_delay, "downlink").await;
        }
        if route.archive {
            sent |= forward_with_retry(&self.archive, frame, self.retry_delay, "archive").await;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;
    use crate::codec::GroupingFlag;
    use crate::fabric::{bounded, readiness};
    use proptest::prelude::*;

    const HK: u16 = 0x00;

    fn row(downlink: Decimation, archive: Decimation) -> FilterRow {
        FilterRow { apid: HK, downlink: vec![downlink; 5], archive: vec![archive; 5] }
    }

    fn frame(apid: u16) -> TelemetryTransferFrame {
        TelemetryTransferFrame::new(b"x", apid, GroupingFlag::Unsegmented, 1, MissionTime::new(1, 0))
            .unwrap()
    }

    #[test]
    fn one_in_four_forwards_first_and_wraps() {
        let mut table = FilterTable::new(vec![row(Decimation::new(4, 1), Decimation::NEVER)], Mode::Normal);
        let routes: Vec<bool> = (0..4).map(|_| table.route(HK).unwrap().downlink).collect();
        assert_eq!(routes, vec![true, false, false, false]);
        assert_eq!(table.state[0].downlink, 1);
        assert!(table.route(HK).unwrap().downlink);
    }

    #[test]
    fn range_equal_frequency_always_forwards() {
        let mut table = FilterTable::new(vec![row(Decimation::new(3, 3), Decimation::ALWAYS)], Mode::Normal);
        for _ in 0..10 {
            assert_eq!(table.route(HK), Some(Route { downlink: true, archive: true }));
        }
        assert_eq!(table.state[0].downlink, 3);
    }

    #[test]
    fn partial_frequency_follows_counter_rules() {
        // counter starts at 2: forward, 3, 4, wrap to 2
        let mut table = FilterTable::new(vec![row(Decimation::new(4, 2), Decimation::NEVER)], Mode::Normal);
        let routes: Vec<bool> = (0..6).map(|_| table.route(HK).unwrap().downlink).collect();
        assert_eq!(routes, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn mode_switch_resets_counters() {
        let rows = vec![FilterRow {
            apid: HK,
            downlink: vec![Decimation::new(4, 1), Decimation::new(5, 1)],
            archive: vec![Decimation::NEVER, Decimation::ALWAYS],
        }];
        let mut table = FilterTable::new(rows, Mode::Normal);
        table.route(HK);
        table.route(HK);

        table.set_mode(Mode::Realtime);
        assert_eq!(table.route(HK), Some(Route { downlink: true, archive: true }));

        // unpopulated column
        table.set_mode(Mode::Playback);
        assert_eq!(table.route(HK), Some(Route { downlink: false, archive: false }));
    }

    #[test]
    fn unknown_apid_has_no_route() {
        let mut table = FilterTable::new(vec![row(Decimation::ALWAYS, Decimation::ALWAYS)], Mode::Normal);
        assert_eq!(table.route(0x123), None);
    }

    #[test]
    fn mode_indices() {
        for (i, mode) in Mode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
            assert_eq!(Mode::from_index(i as u32), Some(*mode));
        }
        assert_eq!(Mode::from_index(5), None);
    }

    proptest! {
        #[test]
        fn one_in_range_over_any_window(range in 1u32..20, skip in 0usize..40) {
            let mut table =
                FilterTable::new(vec![row(Decimation::new(range, 1), Decimation::new(range, range))], Mode::Imaging);
            for _ in 0..skip {
                table.route(HK);
            }
            let window: Vec<Route> = (0..range).map(|_| table.route(HK).unwrap()).collect();
            prop_assert_eq!(window.iter().filter(|r| r.downlink).count(), 1);
            prop_assert!(window.iter().all(|r| r.archive));

            let next: Vec<Route> = (0..range).map(|_| table.route(HK).unwrap()).collect();
            prop_assert_eq!(next, window);
        }

        #[test]
        fn first_frame_after_switch(freq in 0u32..5, extra in 0u32..5, before in 0usize..10) {
            let rows = vec![FilterRow {
                apid: HK,
                downlink: vec![Decimation::new(7, 3), Decimation::new(freq + extra, freq)],
                archive: vec![Decimation::ALWAYS, Decimation::NEVER],
            }];
            let mut table = FilterTable::new(rows, Mode::Normal);
            for _ in 0..before {
                table.route(HK);
            }
            table.set_mode(Mode::Realtime);
            let route = table.route(HK).unwrap();
            prop_assert_eq!(route.downlink, freq > 0);
            prop_assert!(!route.archive);
        }
    }

    #[tokio::test]
    async fn engine_splits_frames_between_sinks() {
        let rows = vec![
            FilterRow { apid: 0x00, downlink: vec![Decimation::ALWAYS], archive: vec![Decimation::NEVER] },
            FilterRow { apid: 0xC8, downlink: vec![Decimation::NEVER], archive: vec![Decimation::ALWAYS] },
        ];
        let (frame_tx, frame_rx) = bounded(10);
        let (_control_tx, control_rx) = bounded(1);
        let (down_tx, mut down_rx) = bounded(10);
        let (arch_tx, mut arch_rx) = bounded(10);
        let (down_ready, down_wait) = readiness();
        let (ready, ready_wait) = readiness();
        down_ready.raise();

        let engine = FilterEngine {
            table: FilterTable::new(rows, Mode::Normal),
            frames: frame_rx,
            control: control_rx,
            downlink: down_tx,
            archive: arch_tx,
            retry_delay: Duration::from_millis(350),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(vec![down_wait], ready, cancel.clone()));
        ready_wait.wait().await.unwrap();

        frame_tx.send(frame(0x00), Wait::Forever).await.unwrap();
        frame_tx.send(frame(0xC8), Wait::Forever).await.unwrap();
        frame_tx.send(frame(0x64), Wait::Forever).await.unwrap();

        assert_eq!(down_rx.recv(Wait::Forever).await.unwrap().apid(), 0x00);
        assert_eq!(arch_rx.recv(Wait::Forever).await.unwrap().apid(), 0xC8);

        drop(frame_tx);
        task.await.unwrap();
        assert!(down_rx.is_empty());
        assert!(arch_rx.is_empty());
    }

    #[tokio::test]
    async fn control_channel_changes_mode() {
        let rows = vec![FilterRow {
            apid: 0x00,
            downlink: vec![Decimation::NEVER, Decimation::ALWAYS],
            archive: vec![],
        }];
        let (frame_tx, frame_rx) = bounded(10);
        let (control_tx, control_rx) = bounded(1);
        let (down_tx, mut down_rx) = bounded(10);
        let (arch_tx, _arch_rx) = bounded(10);
        let (ready, ready_wait) = readiness();

        let engine = FilterEngine {
            table: FilterTable::new(rows, Mode::Normal),
            frames: frame_rx,
            control: control_rx,
            downlink: down_tx,
            archive: arch_tx,
            retry_delay: Duration::from_millis(350),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(vec![], ready, cancel.clone()));
        ready_wait.wait().await.unwrap();

        frame_tx.send(frame(0x00), Wait::Forever).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        control_tx.send(Mode::Realtime, Wait::Forever).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        frame_tx.send(frame(0x00), Wait::Forever).await.unwrap();

        let got = down_rx.recv(Wait::For(Duration::from_secs(1))).await.unwrap();
        assert_eq!(got.apid(), 0x00);
        cancel.cancel();
        task.await.unwrap();
        assert!(down_rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_downlink_gets_one_retry_then_drops() {
        let rows = vec![FilterRow { apid: HK, downlink: vec![Decimation::ALWAYS], archive: vec![] }];
        let (frame_tx, frame_rx) = bounded(10);
        let (_control_tx, control_rx) = bounded(1);
        let (down_tx, mut down_rx) = bounded(1);
        let (arch_tx, _arch_rx) = bounded(1);
        let (ready, ready_wait) = readiness();

        let engine = FilterEngine {
            table: FilterTable::new(rows, Mode::Normal),
            frames: frame_rx,
            control: control_rx,
            downlink: down_tx,
            archive: arch_tx,
            retry_delay: Duration::from_millis(350),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(vec![], ready, cancel.clone()));
        ready_wait.wait().await.unwrap();

        fn tagged(tag: &[u8]) -> TelemetryTransferFrame {
            TelemetryTransferFrame::new(tag, HK, GroupingFlag::Unsegmented, 1, MissionTime::new(1, 0)).unwrap()
        }
        fn tag_of(frame: TelemetryTransferFrame) -> u8 {
            frame.decode_packet().unwrap().user_data[0]
        }

        // space freed before the retry lets the frame through
        let start = tokio::time::Instant::now();
        frame_tx.send(tagged(b"A"), Wait::Forever).await.unwrap();
        frame_tx.send(tagged(b"B"), Wait::Forever).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(tag_of(down_rx.recv(Wait::Forever).await.unwrap()), b'A');
        assert_eq!(tag_of(down_rx.recv(Wait::Forever).await.unwrap()), b'B');
        assert!(start.elapsed() >= Duration::from_millis(350));

        // a sink still full after the retry loses the frame
        frame_tx.send(tagged(b"C"), Wait::Forever).await.unwrap();
        frame_tx.send(tagged(b"D"), Wait::Forever).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());
        assert_eq!(tag_of(down_rx.recv(Wait::Forever).await.unwrap()), b'C');

        frame_tx.send(tagged(b"E"), Wait::Forever).await.unwrap();
        assert_eq!(tag_of(down_rx.recv(Wait::Forever).await.unwrap()), b'E');
        assert!(down_rx.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }
}
