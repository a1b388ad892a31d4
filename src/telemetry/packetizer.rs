//! Telemetry packetizer.
//!
//! Polls its three sources in priority order, housekeeping first, then
//! magnetometer DAQ, then processed images, each for one poll window. After
//! servicing housekeeping or DAQ data that source is skipped on the next
//! pass; polling the image source clears both skips. Payloads become transfer
//! frames stamped with mission time and a shared sequence count, segmented
//! when they exceed one packet.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clock::MissionClock;
use crate::codec::header::MAX_SEQUENCE;
use crate::codec::telemetry::USER_DATA_LEN;
use crate::codec::{GroupingFlag, TelemetryTransferFrame};
use crate::command::Destination;
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Receiver, Sender, Wait, forward_with_retry};

/// 14-bit sequence count shared by every telemetry source.
///
/// Starts at 1 and wraps from 16382 back to 1; 16383 is never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter(u16);

impl Default for SequenceCounter {
    fn default() -> Self {
        Self(1)
    }
}

impl SequenceCounter {
    pub fn next(&mut self) -> u16 {
        let current = self.0;
        self.0 = if current + 1 >= MAX_SEQUENCE { 1 } else { current + 1 };
        current
    }
}

/// Split `payload` into packet-sized pieces with their grouping flags.
pub fn segment(payload: &[u8]) -> Vec<(GroupingFlag, &[u8])> {
    if payload.len() <= USER_DATA_LEN {
        return vec![(GroupingFlag::Unsegmented, payload)];
    }
    let chunks: Vec<&[u8]> = payload.chunks(USER_DATA_LEN).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let flag = match i {
                0 => GroupingFlag::First,
                i if i == last => GroupingFlag::Last,
                _ => GroupingFlag::Continuation,
            };
            (flag, chunk)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Housekeeping,
    Magnetometer,
    Image,
}

impl Source {
    fn apid(self) -> u16 {
        match self {
            Source::Housekeeping => Destination::Software.apid(),
            Source::Magnetometer => Destination::Magnetometer.apid(),
            Source::Image => Destination::Imaging.apid(),
        }
    }
}

pub struct Packetizer {
    pub housekeeping: Receiver<Vec<u8>>,
    pub magnetometer: Receiver<Vec<u8>>,
    pub images: Receiver<Vec<u8>>,
    pub filter: Sender<TelemetryTransferFrame>,
    pub clock: MissionClock,
    pub poll_window: Duration,
    pub retry_delay: Duration,
    sequence: SequenceCounter,
    skip_housekeeping: bool,
    skip_magnetometer: bool,
}

impl Packetizer {
    pub fn new(
        housekeeping: Receiver<Vec<u8>>,
        magnetometer: Receiver<Vec<u8>>,
        images: Receiver<Vec<u8>>,
        filter: Sender<TelemetryTransferFrame>,
        clock: MissionClock,
        poll_window: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            housekeeping,
            magnetometer,
            images,
            filter,
            clock,
            poll_window,
            retry_delay,
            sequence: SequenceCounter::default(),
            skip_housekeeping: false,
            skip_magnetometer: false,
        }
    }

    /// One polling pass. Returns the source serviced, if any, or `Err` once
    /// every source is closed.
    async fn poll_once(&mut self) -> Result<Option<Source>, ChannelError> {
        let window = Wait::For(self.poll_window);
        let mut closed = 0;

        if !self.skip_housekeeping {
            match self.housekeeping.recv(window).await {
                Ok(record) => {
                    self.emit(Source::Housekeeping, &record).await;
                    self.skip_housekeeping = true;
                    return Ok(Some(Source::Housekeeping));
                }
                Err(ChannelError::Closed) => closed += 1,
                Err(_) => {}
            }
        }

        if !self.skip_magnetometer {
            match self.magnetometer.recv(window).await {
                Ok(packet) => {
                    self.emit(Source::Magnetometer, &packet).await;
                    self.skip_magnetometer = true;
                    return Ok(Some(Source::Magnetometer));
                }
                Err(ChannelError::Closed) => closed += 1,
                Err(_) => {}
            }
        }

        self.skip_housekeeping = false;
        self.skip_magnetometer = false;
        match self.images.recv(window).await {
            Ok(image) => {
                self.emit(Source::Image, &image).await;
                Ok(Some(Source::Image))
            }
            Err(ChannelError::Closed) if closed == 2 => Err(ChannelError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn emit(&mut self, source: Source, payload: &[u8]) {
        let pieces = segment(payload);
        trace!("{:?} payload of {} bytes in {} packets", source, payload.len(), pieces.len());

        for (grouping, piece) in pieces {
            let sequence = self.sequence.next();
            let frame = match TelemetryTransferFrame::new(piece, source.apid(), grouping, sequence, self.clock.now()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Cannot packetize {:?} data: {}", source, e);
                    return;
                }
            };
            forward_with_retry(&self.filter, frame, self.retry_delay, "filter").await;
        }
    }

    pub async fn run(mut self, filter_ready: ReadyWaiter, ready: ReadySignal, cancel: CancellationToken) {
        if filter_ready.wait().await.is_err() {
            warn!("Filter engine went away before startup");
            return;
        }
        ready.raise();
        info!("Packetizer started");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };
            match polled {
                Ok(Some(source)) => debug!("Packetized {:?} data", source),
                Ok(None) => {}
                Err(_) => {
                    debug!("All telemetry sources closed");
                    break;
                }
            }
        }

        info!("Packetizer ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;
    use crate::fabric::{bounded, readiness};

    #[test]
    fn sequence_wraps_to_one() {
        let mut seq = SequenceCounter(MAX_SEQUENCE - 2);
        assert_eq!(seq.next(), 16381);
        assert_eq!(seq.next(), 16382);
        assert_eq!(seq.next(), 1);
        assert_eq!(SequenceCounter::default().next(), 1);
    }

    #[test]
    fn segmentation_flags() {
        let small = vec![0u8; 7];
        assert_eq!(segment(&small).len(), 1);
        assert_eq!(segment(&small)[0].0, GroupingFlag::Unsegmented);

        let exact = vec![0u8; USER_DATA_LEN];
        assert_eq!(segment(&exact)[0].0, GroupingFlag::Unsegmented);

        let image = vec![0u8; USER_DATA_LEN * 3 + 1];
        let flags: Vec<GroupingFlag> = segment(&image).iter().map(|(f, _)| *f).collect();
        assert_eq!(
            flags,
            vec![GroupingFlag::First, GroupingFlag::Continuation, GroupingFlag::Continuation, GroupingFlag::Last]
        );
        assert_eq!(segment(&image)[3].1.len(), 1);

        let two = vec![0u8; USER_DATA_LEN + 1];
        let flags: Vec<GroupingFlag> = segment(&two).iter().map(|(f, _)| *f).collect();
        assert_eq!(flags, vec![GroupingFlag::First, GroupingFlag::Last]);
    }

    struct Rig {
        hk: Sender<Vec<u8>>,
        mag: Sender<Vec<u8>>,
        img: Sender<Vec<u8>>,
        frames: Receiver<TelemetryTransferFrame>,
    }

    fn rig() -> (Packetizer, Rig) {
        let (hk, hk_rx) = bounded(10);
        let (mag, mag_rx) = bounded(10);
        let (img, img_rx) = bounded(10);
        let (filter, frames) = bounded(64);
        let packetizer = Packetizer::new(
            hk_rx,
            mag_rx,
            img_rx,
            filter,
            MissionClock::starting_at(MissionTime::new(500, 0)),
            Duration::from_millis(500),
            Duration::from_millis(350),
        );
        (packetizer, Rig { hk, mag, img, frames })
    }

    #[tokio::test(start_paused = true)]
    async fn alternation_does_not_starve_daq() {
        let (mut p, rig) = rig();
        for _ in 0..3 {
            rig.hk.try_send(vec![1; 7]).unwrap();
            rig.mag.try_send(vec![2; 16]).unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..6 {
            order.push(p.poll_once().await.unwrap());
        }
        // hk, daq, (image poll clears skips), hk, daq, image poll
        assert_eq!(
            order,
            vec![
                Some(Source::Housekeeping),
                Some(Source::Magnetometer),
                None,
                Some(Source::Housekeeping),
                Some(Source::Magnetometer),
                None,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn frames_carry_shared_sequence_and_segments() {
        let (p, mut rig) = rig();
        let (filter_ready, filter_waiter) = readiness();
        let (ready, _waiter) = readiness();
        filter_ready.raise();
        let cancel = CancellationToken::new();
        tokio::spawn(p.run(filter_waiter, ready, cancel.clone()));

        rig.hk.send(vec![9; 7], Wait::Forever).await.unwrap();
        let hk = rig.frames.recv(Wait::Forever).await.unwrap();
        assert_eq!((hk.apid(), hk.grouping()), (0x00, GroupingFlag::Unsegmented));
        assert_eq!(hk.created(), MissionTime::new(500, 0));

        rig.img.send(vec![7; USER_DATA_LEN + 10], Wait::Forever).await.unwrap();
        let first = rig.frames.recv(Wait::Forever).await.unwrap();
        let last = rig.frames.recv(Wait::Forever).await.unwrap();
        assert_eq!((first.apid(), first.grouping()), (0x64, GroupingFlag::First));
        assert_eq!(last.grouping(), GroupingFlag::Last);

        let seqs: Vec<u16> =
            [&hk, &first, &last].iter().map(|f| f.decode_packet().unwrap().header.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_all_sources_close() {
        let (p, rig) = rig();
        let (filter_ready, filter_waiter) = readiness();
        let (ready, _waiter) = readiness();
        filter_ready.raise();
        let task = tokio::spawn(p.run(filter_waiter, ready, CancellationToken::new()));
        drop((rig.hk, rig.mag, rig.img));
        task.await.unwrap();
    }
}
