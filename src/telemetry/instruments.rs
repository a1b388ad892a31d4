//! Instrument readers feeding the packetizer.

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::collaborators::{ImageProcessor, MagnetometerDaq};
use crate::error::ChannelError;
use crate::fabric::{ReadySignal, ReadyWaiter, Receiver, Sender, Wait, failure_backoff};

/// Pulls DAQ packets while the magnetometer handler reports a scan.
pub struct MagnetometerReader {
    pub daq: Box<dyn MagnetometerDaq>,
    pub scanning: watch::Receiver<bool>,
    pub packetizer: Sender<Vec<u8>>,
    pub send_window: Duration,
}

impl MagnetometerReader {
    pub async fn run(mut self, packetizer_ready: ReadyWaiter, cancel: CancellationToken) {
        if packetizer_ready.wait().await.is_err() {
            warn!("Packetizer went away before startup");
            return;
        }
        info!("Magnetometer reader started");

        let mut packets = 0u64;
        let mut error_count = 0u32;
        loop {
            let scanning = tokio::select! {
                _ = cancel.cancelled() => break,
                scanning = self.scanning.wait_for(|s| *s) => scanning.map(|_| ()),
            };
            if scanning.is_err() {
                debug!("Magnetometer handler gone");
                break;
            }

            let packet = tokio::select! {
                _ = cancel.cancelled() => break,
                packet = self.daq.read_packet() => packet,
            };
            match packet {
                Ok(Some(bytes)) => {
                    error_count = 0;
                    if !*self.scanning.borrow() {
                        trace!("Discarding DAQ packet read after scan stop");
                        continue;
                    }
                    packets += 1;
                    match self.packetizer.send(bytes, Wait::For(self.send_window)).await {
                        Ok(()) => {}
                        Err(ChannelError::Closed) => break,
                        Err(e) => debug!("DAQ packet dropped: {}", e),
                    }
                }
                Ok(None) => trace!("Incomplete DAQ transfer"),
                Err(e) => {
                    error_count += 1;
                    warn!("DAQ read failed ({}): {}", error_count, e);
                    tokio::time::sleep(failure_backoff(error_count)).await;
                }
            }
        }

        info!("Magnetometer reader ended ({} packets)", packets);
    }
}

/// Accepted and rejected image counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCounters {
    pub accepted: u32,
    pub rejected: u32,
    pub failed: u32,
}

/// Runs raw images through the image processor and forwards accepted ones.
pub struct ImagePipeline {
    pub raw: Receiver<Vec<u8>>,
    pub processor: Box<dyn ImageProcessor>,
    pub packetizer: Sender<Vec<u8>>,
    pub counters: watch::Sender<ImageCounters>,
    pub max_image_bytes: usize,
    pub send_window: Duration,
}

impl ImagePipeline {
    pub async fn run(mut self, packetizer_ready: ReadyWaiter, ready: ReadySignal, cancel: CancellationToken) {
        if packetizer_ready.wait().await.is_err() {
            warn!("Packetizer went away before startup");
            return;
        }
        ready.raise();
        info!("Image pipeline started");

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                raw = self.raw.recv(Wait::Forever) => raw,
            };
            let raw = match raw {
                Ok(raw) => raw,
                Err(ChannelError::Closed) => break,
                Err(e) => {
                    debug!("Image pipeline receive failed: {}", e);
                    continue;
                }
            };

            if raw.len() > self.max_image_bytes {
                self.counters.send_modify(|c| c.failed = c.failed.wrapping_add(1));
                warn!("Raw image of {} bytes exceeds {} byte limit", raw.len(), self.max_image_bytes);
                continue;
            }

            match self.processor.process(&raw).await {
                Ok(Some(image)) => {
                    self.counters.send_modify(|c| c.accepted = c.accepted.wrapping_add(1));
                    debug!("Image accepted ({} -> {} bytes)", raw.len(), image.len());
                    match self.packetizer.send(image, Wait::For(self.send_window)).await {
                        Ok(()) => {}
                        Err(ChannelError::Closed) => break,
                        Err(e) => warn!("Processed image dropped: {}", e),
                    }
                }
                Ok(None) => {
                    self.counters.send_modify(|c| c.rejected = c.rejected.wrapping_add(1));
                    debug!("Image rejected by processor");
                }
                Err(e) => {
                    self.counters.send_modify(|c| c.failed = c.failed.wrapping_add(1));
                    warn!("Image processing failed: {}", e);
                }
            }
        }

        let c = *self.counters.borrow();
        info!("Image pipeline ended ({} accepted, {} rejected)", c.accepted, c.rejected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{bounded, readiness};
    use crate::sim::{SimImageProcessor, SimMagnetometer};
    use crate::collaborators::MagnetometerControl;

    #[tokio::test(start_paused = true)]
    async fn reader_follows_scan_flag() {
        let sim = SimMagnetometer::new(8).with_period(Duration::from_millis(100));
        let (scan_tx, scanning) = watch::channel(false);
        let (packetizer, mut packets) = bounded(100);
        let (ready, waiter) = readiness();
        ready.raise();
        let reader = MagnetometerReader {
            daq: Box::new(sim.daq()),
            scanning,
            packetizer,
            send_window: Duration::from_millis(500),
        };
        let cancel = CancellationToken::new();
        tokio::spawn(reader.run(waiter, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sim.packets_read(), 0);

        let mut control = sim.control();
        control.send_command("start 0").await.unwrap();
        scan_tx.send_replace(true);
        let packet = packets.recv(Wait::For(Duration::from_secs(1))).await.unwrap();
        assert_eq!(packet.len(), 8);

        control.send_command("stop").await.unwrap();
        scan_tx.send_replace(false);
        tokio::time::sleep(Duration::from_millis(250)).await;
        let read = sim.packets_read();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sim.packets_read(), read);
        cancel.cancel();
    }

    #[tokio::test]
    async fn pipeline_counts_accepted_and_rejected() {
        let (raw_tx, raw) = bounded(10);
        let (packetizer, mut images) = bounded(10);
        let (counters, counters_rx) = watch::channel(ImageCounters::default());
        let (pk_ready, pk_waiter) = readiness();
        let (ready, _waiter) = readiness();
        pk_ready.raise();

        let pipeline = ImagePipeline {
            raw,
            processor: Box::new(SimImageProcessor::new(2, 4)),
            packetizer,
            counters,
            max_image_bytes: 16,
            send_window: Duration::from_millis(500),
        };
        let task = tokio::spawn(pipeline.run(pk_waiter, ready, CancellationToken::new()));

        for i in 0..4u8 {
            raw_tx.send(vec![i; 16], Wait::Forever).await.unwrap();
        }
        drop(raw_tx);
        task.await.unwrap();

        assert_eq!(images.recv(Wait::Forever).await.unwrap(), vec![0; 4]);
        assert_eq!(images.recv(Wait::Forever).await.unwrap(), vec![2; 4]);
        assert_eq!(*counters_rx.borrow(), ImageCounters { accepted: 2, rejected: 2, failed: 0 });
    }

    #[tokio::test]
    async fn oversized_raw_image_skips_processor() {
        let (raw_tx, raw) = bounded(10);
        let (packetizer, mut images) = bounded(10);
        let (counters, counters_rx) = watch::channel(ImageCounters::default());
        let (pk_ready, pk_waiter) = readiness();
        let (ready, _waiter) = readiness();
        pk_ready.raise();

        let pipeline = ImagePipeline {
            raw,
            processor: Box::new(SimImageProcessor::new(1, 4)),
            packetizer,
            counters,
            max_image_bytes: 8,
            send_window: Duration::from_millis(500),
        };
        let task = tokio::spawn(pipeline.run(pk_waiter, ready, CancellationToken::new()));

        raw_tx.send(vec![1; 9], Wait::Forever).await.unwrap();
        raw_tx.send(vec![2; 8], Wait::Forever).await.unwrap();
        drop(raw_tx);
        task.await.unwrap();

        assert_eq!(images.recv(Wait::Forever).await.unwrap(), vec![2; 4]);
        assert!(images.is_empty());
        assert_eq!(*counters_rx.borrow(), ImageCounters { accepted: 1, rejected: 0, failed: 1 });
    }
}
