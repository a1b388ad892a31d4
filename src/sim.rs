//! Simulated collaborators.
//!
//! Stand-ins for the camera, magnetometer DAQ, relay board and image
//! processor. Used by the `cdhd` daemon and by tests. Clones share
//! state so a test can keep a handle after boxing one into the core.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::collaborators::{Camera, ImageProcessor, MagnetometerControl, MagnetometerDaq, RelaySwitch};
use crate::{CdhError, Result};

/// Camera producing a deterministic byte pattern.
#[derive(Debug, Clone)]
pub struct SimCamera {
    image_len: usize,
    exposure: Duration,
    exposures: Arc<AtomicU32>,
}

impl SimCamera {
    pub fn new(image_len: usize) -> Self {
        Self { image_len, exposure: Duration::ZERO, exposures: Arc::new(AtomicU32::new(0)) }
    }

    /// Make each exposure take `exposure` of tokio time.
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = exposure;
        self
    }

    /// Exposures started so far.
    pub fn exposures(&self) -> u32 {
        self.exposures.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Camera for SimCamera {
    async fn acquire(&mut self) -> Result<Vec<u8>> {
        let n = self.exposures.fetch_add(1, Ordering::SeqCst);
        if !self.exposure.is_zero() {
            tokio::time::sleep(self.exposure).await;
        }
        Ok((0..self.image_len).map(|i| (i as u32).wrapping_add(n) as u8).collect())
    }
}

/// Magnetometer DAQ. The control and data halves share scan state.
#[derive(Debug, Clone)]
pub struct SimMagnetometer {
    packet_len: usize,
    period: Duration,
    scanning: Arc<AtomicBool>,
    commands: Arc<Mutex<Vec<String>>>,
    packets: Arc<AtomicU32>,
}

impl SimMagnetometer {
    pub fn new(packet_len: usize) -> Self {
        Self {
            packet_len,
            period: Duration::from_millis(100),
            scanning: Arc::new(AtomicBool::new(false)),
            commands: Arc::new(Mutex::new(Vec::new())),
            packets: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Time between DAQ packets while scanning.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn control(&self) -> SimMagnetometerControl {
        SimMagnetometerControl { inner: self.clone() }
    }

    pub fn daq(&self) -> SimMagnetometerDaq {
        SimMagnetometerDaq { inner: self.clone() }
    }

    /// Commands received, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn packets_read(&self) -> u32 {
        self.packets.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SimMagnetometerControl {
    inner: SimMagnetometer,
}

#[async_trait::async_trait]
impl MagnetometerControl for SimMagnetometerControl {
    async fn send_command(&mut self, command: &str) -> Result<()> {
        match command {
            "start 0" => self.inner.scanning.store(true, Ordering::SeqCst),
            "stop" => self.inner.scanning.store(false, Ordering::SeqCst),
            "led 6" => {}
            other => {
                return Err(CdhError::collaborator_failed("magnetometer", format!("unknown command '{other}'")));
            }
        }
        if let Ok(mut commands) = self.inner.commands.lock() {
            commands.push(command.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimMagnetometerDaq {
    inner: SimMagnetometer,
}

#[async_trait::async_trait]
impl MagnetometerDaq for SimMagnetometerDaq {
    async fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        tokio::time::sleep(self.inner.period).await;
        if !self.inner.scanning.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = self.inner.packets.fetch_add(1, Ordering::SeqCst);
        Ok(Some(vec![n as u8; self.inner.packet_len]))
    }
}

/// Relay board remembering the magnetometer power state.
#[derive(Debug, Clone, Default)]
pub struct SimRelay {
    on: Arc<AtomicBool>,
}

impl SimRelay {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RelaySwitch for SimRelay {
    async fn set_magnetometer_power(&mut self, on: bool) -> Result<()> {
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

/// Image processor that keeps every `keep_every`-th image and truncates it.
#[derive(Debug, Clone)]
pub struct SimImageProcessor {
    keep_every: u32,
    output_len: usize,
    seen: Arc<AtomicU32>,
}

impl SimImageProcessor {
    pub fn new(keep_every: u32, output_len: usize) -> Self {
        Self { keep_every: keep_every.max(1), output_len, seen: Arc::new(AtomicU32::new(0)) }
    }
}

#[async_trait::async_trait]
impl ImageProcessor for SimImageProcessor {
    async fn process(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n % self.keep_every != 0 {
            return Ok(None);
        }
        let mut processed: Vec<u8> = raw.iter().copied().take(self.output_len).collect();
        processed.resize(self.output_len, 0);
        Ok(Some(processed))
    }
}
