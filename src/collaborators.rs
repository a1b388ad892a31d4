//! Seams to the hardware and external processes around the core.
//!
//! Device drivers live outside this crate. The core talks to them through
//! these traits.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{CdhError, Result};

/// Imaging camera.
#[async_trait::async_trait]
pub trait Camera: Send + 'static {
    /// Take one exposure and return the raw image.
    async fn acquire(&mut self) -> Result<Vec<u8>>;
}

/// Command side of the magnetometer DAQ.
#[async_trait::async_trait]
pub trait MagnetometerControl: Send + 'static {
    /// Send one text command, e.g. `"start 0"`, `"stop"`, `"led 6"`.
    async fn send_command(&mut self, command: &str) -> Result<()>;
}

/// Data side of the magnetometer DAQ.
#[async_trait::async_trait]
pub trait MagnetometerDaq: Send + 'static {
    /// Read one DAQ packet.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - complete packet
    /// - `Ok(None)` - transfer finished but the packet is incomplete
    /// - `Err(e)` - device failure
    async fn read_packet(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Electrical relay board.
#[async_trait::async_trait]
pub trait RelaySwitch: Send + 'static {
    async fn set_magnetometer_power(&mut self, on: bool) -> Result<()>;
}

/// External image processor.
#[async_trait::async_trait]
pub trait ImageProcessor: Send + 'static {
    /// Returns the processed image, or `None` if the processor rejected it.
    async fn process(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Image processor reached over a byte stream.
///
/// Handshake: write the raw image, read a little-endian `u32`. Zero rejects
/// the image; any other value is the length of the processed image that
/// follows. A length above `max_len` fails the handshake without reading
/// the body.
pub struct StreamImageProcessor<S> {
    stream: S,
    max_len: usize,
}

impl<S> StreamImageProcessor<S> {
    pub fn new(stream: S, max_len: usize) -> Self {
        Self { stream, max_len }
    }
}

#[async_trait::async_trait]
impl<S> ImageProcessor for StreamImageProcessor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn process(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        self.stream.write_all(raw).await.map_err(processor_io)?;
        self.stream.flush().await.map_err(processor_io)?;

        let len = self.stream.read_u32_le().await.map_err(processor_io)?;
        if len == 0 {
            debug!("Image processor rejected {} byte image", raw.len());
            return Ok(None);
        }

        let len = len as usize;
        if len > self.max_len {
            return Err(CdhError::collaborator_failed(
                "image processor",
                format!("announced {} byte image, limit is {}", len, self.max_len),
            ));
        }

        let mut processed = vec![0u8; len];
        self.stream.read_exact(&mut processed).await.map_err(processor_io)?;
        Ok(Some(processed))
    }
}

fn processor_io(e: std::io::Error) -> CdhError {
    CdhError::collaborator_failed_with_source("image processor", "handshake failed", Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepted_image() {
        let (core, mut remote) = tokio::io::duplex(256);
        let mut processor = StreamImageProcessor::new(core, 64);

        let remote_task = tokio::spawn(async move {
            let mut raw = [0u8; 8];
            remote.read_exact(&mut raw).await.unwrap();
            remote.write_u32_le(3).await.unwrap();
            remote.write_all(&raw[..3]).await.unwrap();
        });

        let processed = processor.process(b"rawimage").await.unwrap();
        assert_eq!(processed.as_deref(), Some(&b"raw"[..]));
        remote_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_image() {
        let (core, mut remote) = tokio::io::duplex(256);
        let mut processor = StreamImageProcessor::new(core, 64);

        tokio::spawn(async move {
            let mut raw = [0u8; 4];
            remote.read_exact(&mut raw).await.unwrap();
            remote.write_u32_le(0).await.unwrap();
            // keep the stream open until the core has read the verdict
            let _ = remote.read_u8().await;
        });

        assert_eq!(processor.process(b"blur").await.unwrap(), None);
    }

    #[tokio::test]
    async fn processor_hangup_is_collaborator_failure() {
        let (core, remote) = tokio::io::duplex(256);
        let mut processor = StreamImageProcessor::new(core, 64);
        drop(remote);

        let err = processor.process(b"img").await.unwrap_err();
        assert!(matches!(err, CdhError::Collaborator { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn oversized_length_fails_before_body() {
        let (core, mut remote) = tokio::io::duplex(256);
        let mut processor = StreamImageProcessor::new(core, 64);

        tokio::spawn(async move {
            let mut raw = [0u8; 3];
            remote.read_exact(&mut raw).await.unwrap();
            remote.write_u32_le(0xFFFF_FFF0).await.unwrap();
            let _ = remote.read_u8().await;
        });

        let err = processor.process(b"img").await.unwrap_err();
        assert!(matches!(err, CdhError::Collaborator { .. }));
        assert!(err.to_string().contains("limit is 64"));
    }
}
