//! Playback: replays an archive category onto the downlink, oldest first.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ArchiveReader, Category};
use crate::codec::TelemetryTransferFrame;
use crate::command::ExecStatus;
use crate::error::ChannelError;
use crate::fabric::{Inbox, ReadySignal, ReadyWaiter, Sender, Wait, forward_with_retry};

pub struct Playback {
    pub inbox: Inbox<Category, ExecStatus>,
    pub reader: ArchiveReader,
    pub downlink: Sender<TelemetryTransferFrame>,
    pub retry_delay: Duration,
}

impl Playback {
    /// Push every archived frame of `category` to the downlink.
    ///
    /// Returns the number of frames handed to the downlink.
    pub async fn replay(&self, category: Category) -> usize {
        let paths = match self.reader.entries(category).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Cannot list {} archive: {}", category.dir_name(), e);
                return 0;
            }
        };
        debug!("Replaying {} {} entries", paths.len(), category.dir_name());

        let mut sent = 0;
        for path in paths {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let frame = match TelemetryTransferFrame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping corrupt archive entry {}: {}", path.display(), e);
                    continue;
                }
            };
            if forward_with_retry(&self.downlink, frame, self.retry_delay, "downlink").await {
                sent += 1;
            }
        }
        sent
    }

    pub async fn run(mut self, downlink_ready: ReadyWaiter, ready: ReadySignal, cancel: CancellationToken) {
        if downlink_ready.wait().await.is_err() {
            warn!("Downlink went away before startup");
            return;
        }
        ready.raise();
        info!("Playback started");

        loop {
            let call = tokio::select! {
                _ = cancel.cancelled() => break,
                call = self.inbox.recv(Wait::Forever) => call,
            };
            let call = match call {
                Ok(call) => call,
                Err(ChannelError::Closed) => break,
                Err(e) => {
                    warn!("Playback receive failed: {}", e);
                    continue;
                }
            };

            let category = *call.request();
            let sent = self.replay(category).await;
            info!("Played back {} {} frames", sent, category.dir_name());
            call.reply(if sent > 0 { ExecStatus::Success } else { ExecStatus::Fail });
        }

        info!("Playback ended");
    }
}
