//! Runtime spawns and wires every flight software task.
//!
//! Consumers come up before their producers. Each task awaits the readiness
//! of the tasks it sends to, then raises its own:
//!
//! ```text
//! downlink, archive writer  ->  filter engine  ->  packetizer
//!     packetizer  ->  housekeeping, magnetometer reader, image pipeline
//!     downlink  ->  playback  ->  software handler
//!     image pipeline  ->  imaging handler
//!     handlers, scheduler  ->  executor  ->  processor  ->  uplink receiver
//! ```

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::archive::{ArchiveReader, ArchiveStore, ArchiveWriter, Playback};
use crate::clock::MissionClock;
use crate::collaborators::{Camera, ImageProcessor, MagnetometerControl, MagnetometerDaq, RelaySwitch};
use crate::command::handlers::{ImagingHandler, ImagingState, MagnetometerHandler, RelayHandler, SoftwareHandler, serve};
use crate::command::{
    CommandProcessor, DispatchCounters, Executor, Handlers, Scheduler, UplinkCounters, UplinkReceiver,
};
use crate::config::FswConfig;
use crate::fabric::{ReadyWaiter, bounded, endpoint, readiness, wait_all};
use crate::sim::{SimCamera, SimImageProcessor, SimMagnetometer, SimRelay};
use crate::telemetry::{
    Downlink, FilterEngine, FilterTable, Housekeeping, HousekeepingSnapshot, ImageCounters, ImagePipeline,
    MagnetometerReader, Packetizer,
};
use crate::{CdhError, Result};

/// Byte streams and devices the core talks to.
pub struct Collaborators {
    pub uplink: Box<dyn AsyncRead + Send + Unpin>,
    pub downlink: Box<dyn AsyncWrite + Send + Unpin>,
    pub camera: Box<dyn Camera>,
    pub magnetometer_control: Box<dyn MagnetometerControl>,
    pub magnetometer_daq: Box<dyn MagnetometerDaq>,
    pub relay: Box<dyn RelaySwitch>,
    pub image_processor: Box<dyn ImageProcessor>,
    pub clock: MissionClock,
}

impl Collaborators {
    /// Real byte streams with simulated instruments.
    pub fn simulated<R, W>(uplink: R, downlink: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let magnetometer = SimMagnetometer::new(64).with_period(Duration::from_millis(250));
        Self {
            uplink: Box::new(uplink),
            downlink: Box::new(downlink),
            camera: Box::new(SimCamera::new(4096).with_exposure(Duration::from_secs(2))),
            magnetometer_control: Box::new(magnetometer.control()),
            magnetometer_daq: Box::new(magnetometer.daq()),
            relay: Box::new(SimRelay::default()),
            image_processor: Box::new(SimImageProcessor::new(2, 2048)),
            clock: MissionClock::system(),
        }
    }
}

/// Entry point for starting the flight software.
pub struct FlightSoftware;

impl FlightSoftware {
    /// Validate `config`, then spawn every task on the current runtime.
    pub fn spawn(config: FswConfig, collaborators: Collaborators) -> Result<FlightSoftwareHandle> {
        config.validate()?;

        let cap = config.queue_capacity;
        let retry_delay = config.retry_delay();
        let clock = collaborators.clock;
        let cancel = CancellationToken::new();
        let mut tasks = Tasks::default();

        // Telemetry channels
        let (downlink_tx, downlink_rx) = bounded(cap);
        let (archive_tx, archive_rx) = bounded(cap);
        let (filter_tx, filter_rx) = bounded(cap);
        let (mode_tx, mode_rx) = bounded(cap);
        let (hk_tx, hk_rx) = bounded(cap);
        let (mag_tx, mag_rx) = bounded(cap);
        let (image_tx, image_rx) = bounded(cap);
        let (raw_image_tx, raw_image_rx) = bounded(cap);

        // Command channels
        let (uplink_tx, uplink_rx) = bounded(cap);
        let (inbound_tx, inbound_rx) = bounded(cap);
        let (completion_tx, completion_rx) = bounded(cap);
        let (scheduler, scheduler_inbox) = endpoint(cap);
        let (playback, playback_inbox) = endpoint(cap);
        let (software, software_inbox) = endpoint(cap);
        let (imaging, imaging_inbox) = endpoint(cap);
        let (magnetometer, magnetometer_inbox) = endpoint(cap);
        let (relay, relay_inbox) = endpoint(cap);

        // Published state
        let (uplink_counters, uplink_counters_rx) = watch::channel(UplinkCounters::default());
        let (dispatch_counters, dispatch_counters_rx) = watch::channel(DispatchCounters::default());
        let (snapshots, snapshots_rx) = watch::channel(HousekeepingSnapshot::default());
        let (scanning, scanning_rx) = watch::channel(false);
        let (imaging_state, imaging_state_rx) = watch::channel(ImagingState::Idle);
        let (image_counters, image_counters_rx) = watch::channel(ImageCounters::default());

        // Sinks
        let (downlink_ready, downlink_wait) = readiness();
        let downlink = Downlink { frames: downlink_rx, writer: collaborators.downlink };
        tasks.spawn("downlink", downlink.run(downlink_ready, cancel.clone()));

        let (archive_ready, archive_wait) = readiness();
        let writer = ArchiveWriter { frames: archive_rx, store: ArchiveStore::new(&config.archive_root) };
        tasks.spawn("archive writer", writer.run(archive_ready, cancel.clone()));

        let (filter_ready, filter_wait) = readiness();
        let filter = FilterEngine {
            table: FilterTable::new(config.filter_table.rows.clone(), config.filter_table.initial_mode),
            frames: filter_rx,
            control: mode_rx,
            downlink: downlink_tx.clone(),
            archive: archive_tx,
            retry_delay,
        };
        tasks.spawn(
            "filter engine",
            filter.run(vec![downlink_wait.clone(), archive_wait], filter_ready, cancel.clone()),
        );

        // Telemetry sources
        let (packetizer_ready, packetizer_wait) = readiness();
        let packetizer =
            Packetizer::new(hk_rx, mag_rx, image_rx, filter_tx, clock, config.poll_window(), retry_delay);
        tasks.spawn("packetizer", packetizer.run(filter_wait, packetizer_ready, cancel.clone()));

        let housekeeping = Housekeeping {
            uplink: uplink_counters_rx,
            dispatch: dispatch_counters_rx,
            packetizer: hk_tx,
            snapshots,
            period: config.housekeeping_period(),
        };
        tasks.spawn("housekeeping", housekeeping.run(packetizer_wait.clone(), cancel.clone()));

        let reader = MagnetometerReader {
            daq: collaborators.magnetometer_daq,
            scanning: scanning_rx.clone(),
            packetizer: mag_tx,
            send_window: config.poll_window(),
        };
        tasks.spawn("magnetometer reader", reader.run(packetizer_wait.clone(), cancel.clone()));

        let (pipeline_ready, pipeline_wait) = readiness();
        let pipeline = ImagePipeline {
            raw: raw_image_rx,
            processor: collaborators.image_processor,
            packetizer: image_tx,
            counters: image_counters,
            max_image_bytes: config.max_image_bytes,
            send_window: config.poll_window(),
        };
        tasks.spawn("image pipeline", pipeline.run(packetizer_wait.clone(), pipeline_ready, cancel.clone()));

        let (playback_ready, playback_wait) = readiness();
        let replay = Playback {
            inbox: playback_inbox,
            reader: ArchiveReader::new(&config.archive_root),
            downlink: downlink_tx,
            retry_delay,
        };
        tasks.spawn("playback", replay.run(downlink_wait, playback_ready, cancel.clone()));

        // Command handlers
        let (software_ready, software_wait) = readiness();
        let handler = SoftwareHandler { playback, filter_control: mode_tx };
        tasks.spawn(
            "software handler",
            serve(handler, software_inbox, vec![playback_wait], software_ready, cancel.clone()),
        );

        let (imaging_ready, imaging_wait) = readiness();
        let handler = ImagingHandler {
            inbox: imaging_inbox,
            camera: collaborators.camera,
            images: raw_image_tx,
            completions: completion_tx,
            interval: config.imaging_interval(),
            retry_delay,
            state: imaging_state,
        };
        tasks.spawn("imaging handler", handler.run(vec![pipeline_wait], imaging_ready, cancel.clone()));

        let (magnetometer_ready, magnetometer_wait) = readiness();
        let handler = MagnetometerHandler { control: collaborators.magnetometer_control, scanning };
        tasks.spawn(
            "magnetometer handler",
            serve(handler, magnetometer_inbox, Vec::new(), magnetometer_ready, cancel.clone()),
        );

        let (relay_ready, relay_wait) = readiness();
        let handler = RelayHandler { relay: collaborators.relay };
        tasks.spawn("relay handler", serve(handler, relay_inbox, Vec::new(), relay_ready, cancel.clone()));

        let (scheduler_ready, scheduler_wait) = readiness();
        let atc = Scheduler::new(scheduler_inbox, inbound_tx.clone(), clock, retry_delay);
        tasks.spawn("scheduler", atc.run(scheduler_ready, cancel.clone()));

        // Command pipeline
        let (executor_ready, executor_wait) = readiness();
        let executor = Executor {
            inbound: inbound_rx,
            completions: completion_rx,
            scheduler,
            handlers: Handlers { software, imaging, magnetometer, relay },
            counters: dispatch_counters,
        };
        let handlers_ready = vec![software_wait, imaging_wait, magnetometer_wait, relay_wait, scheduler_wait];
        tasks.spawn("executor", executor.run(handlers_ready, executor_ready, cancel.clone()));

        let (processor_ready, processor_wait) = readiness();
        let processor = CommandProcessor {
            packets: uplink_rx,
            executor: inbound_tx,
            counters: uplink_counters,
            clock,
            exec_time_tolerance_secs: config.exec_time_tolerance_secs,
        };
        tasks.spawn("command processor", processor.run(executor_wait, processor_ready, cancel.clone()));

        let receiver = UplinkReceiver { uplink: collaborators.uplink, processor: uplink_tx };
        tasks.spawn("uplink receiver", receiver.run(processor_wait.clone(), cancel.clone()));

        info!("Flight software spawned {} tasks", tasks.handles.len());

        Ok(FlightSoftwareHandle {
            cancel,
            ready: vec![processor_wait, packetizer_wait],
            housekeeping: snapshots_rx,
            imaging: imaging_state_rx,
            images: image_counters_rx,
            scanning: scanning_rx,
            tasks: tasks.handles,
        })
    }
}

#[derive(Default)]
struct Tasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Tasks {
    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!("Spawning {}", name);
        self.handles.push((name, tokio::spawn(task)));
    }
}

/// Handle to a running flight software instance.
pub struct FlightSoftwareHandle {
    cancel: CancellationToken,
    ready: Vec<ReadyWaiter>,
    housekeeping: watch::Receiver<HousekeepingSnapshot>,
    imaging: watch::Receiver<ImagingState>,
    images: watch::Receiver<ImageCounters>,
    scanning: watch::Receiver<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl FlightSoftwareHandle {
    /// Resolve once both the command chain and the telemetry chain are up.
    pub async fn ready(&self) -> Result<()> {
        wait_all(self.ready.clone()).await.map_err(CdhError::from)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest housekeeping snapshot, updated once per housekeeping period.
    pub fn housekeeping(&self) -> watch::Receiver<HousekeepingSnapshot> {
        self.housekeeping.clone()
    }

    /// Housekeeping snapshots as a stream.
    pub fn housekeeping_updates(&self) -> WatchStream<HousekeepingSnapshot> {
        WatchStream::new(self.housekeeping.clone())
    }

    pub fn imaging_state(&self) -> watch::Receiver<ImagingState> {
        self.imaging.clone()
    }

    pub fn image_counters(&self) -> watch::Receiver<ImageCounters> {
        self.images.clone()
    }

    pub fn magnetometer_scanning(&self) -> watch::Receiver<bool> {
        self.scanning.clone()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        info!("Shutting down flight software");
        self.cancel.cancel();

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                error!("Task {} did not end cleanly: {}", name, e);
            }
        }
        info!("Flight software stopped");
    }
}
