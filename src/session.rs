use std::{
    fmt, fs,
    path::PathBuf,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use serde::Deserialize;

use crate::{
    capture::{self, CaptureOutcome},
    device::{
        BodyFrame, ColorFrame, DepthFrame, FaceFrame, FaceTrackingSource, FrameArrived,
        SensorDevice,
    },
    error::{Error, Result},
    pipeline::{
        DEFAULT_MARKER_COLOR, FrameBuffer, FramePipeline, FrameSlot, FrameWriter, PipelineStats,
        PixelFormat, SharedTracking, StreamCounters, TrackingCorrelator, lock_tracking,
    },
    types::{FaceFrameFeatures, FaceLandmarks, TrackingState},
};

pub const STATUS_READY: &str = "READY";
pub const STATUS_OPENED: &str = "Sensor opened, now working...";
pub const STATUS_CLOSED: &str = "Sensor closed.";

/// Which streams a session subscribes to and what ends up in the frame buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamMode {
    Color,
    Depth,
    #[default]
    FaceOverlay,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamMode::Color => "color",
            StreamMode::Depth => "depth",
            StreamMode::FaceOverlay => "face-overlay",
        };
        f.write_str(name)
    }
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "color" => Ok(StreamMode::Color),
            "depth" => Ok(StreamMode::Depth),
            "face-overlay" | "face" => Ok(StreamMode::FaceOverlay),
            other => Err(format!(
                "unknown stream mode `{other}` (expected color, depth or face-overlay)"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub mode: StreamMode,
    /// Buffer format for color modes; depth always renders into `Bgr24`.
    pub display_format: PixelFormat,
    pub marker_color: [u8; 3],
    pub capture_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            display_format: PixelFormat::Bgra32,
            marker_color: DEFAULT_MARKER_COLOR,
            capture_dir: PathBuf::from(capture::DEFAULT_CAPTURE_DIR),
            jpeg_quality: capture::DEFAULT_JPEG_QUALITY,
        }
    }
}

impl SessionConfig {
    fn buffer_format(&self) -> PixelFormat {
        match self.mode {
            StreamMode::Depth => PixelFormat::Bgr24,
            StreamMode::Color | StreamMode::FaceOverlay => self.display_format,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
}

#[derive(Clone, Debug)]
pub struct DisplayHandle {
    slot: Arc<FrameSlot>,
}

impl DisplayHandle {
    pub fn latest(&self) -> Option<Arc<FrameBuffer>> {
        self.slot.latest()
    }

    pub fn published(&self) -> u64 {
        self.slot.published()
    }
}

/// Subscriptions handed to the dispatch thread.
#[derive(Default)]
struct Streams {
    color: Option<Receiver<FrameArrived<ColorFrame>>>,
    depth: Option<Receiver<FrameArrived<DepthFrame>>>,
    body: Option<Receiver<FrameArrived<BodyFrame>>>,
    face: Option<Receiver<FrameArrived<FaceFrame>>>,
    face_source: Option<Box<dyn FaceTrackingSource>>,
}

#[derive(Clone, Copy, Debug)]
enum StreamKind {
    Color,
    Depth,
    Body,
    Face,
}

#[derive(Debug)]
struct Dispatcher {
    closing: Arc<AtomicBool>,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<FramePipeline>>,
}

impl Dispatcher {
    fn spawn(
        streams: Streams,
        pipeline: FramePipeline,
        counters: Arc<StreamCounters>,
    ) -> Result<Self> {
        let closing = Arc::new(AtomicBool::new(false));
        let closing_flag = closing.clone();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("frame-dispatch".to_string())
            .spawn(move || run_dispatch(streams, pipeline, counters, closing_flag, shutdown_rx))
            .map_err(|err| {
                Error::Device(anyhow::Error::new(err).context("failed to spawn dispatch thread"))
            })?;

        Ok(Self {
            closing,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stops the loop and waits for it; no handler runs once this returns.
    fn shutdown(&mut self) -> Option<thread::Result<FramePipeline>> {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown_tx.take();
        self.handle.take().map(|handle| handle.join())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn run_dispatch(
    streams: Streams,
    mut pipeline: FramePipeline,
    counters: Arc<StreamCounters>,
    closing: Arc<AtomicBool>,
    shutdown: Receiver<()>,
) -> FramePipeline {
    let Streams {
        color,
        depth,
        body,
        face,
        mut face_source,
    } = streams;
    let mut color = color.unwrap_or_else(never);
    let mut depth = depth.unwrap_or_else(never);
    let mut body = body.unwrap_or_else(never);
    let mut face = face.unwrap_or_else(never);

    let run = |stream: &str, handler: &mut dyn FnMut() -> Result<()>| {
        if closing.load(Ordering::Acquire) {
            log::trace!("{stream} frame arrived while closing, ignored");
            return;
        }
        if let Err(err) = handler() {
            counters.record_failure();
            log::warn!("{stream} frame handler failed: {err}");
        }
    };

    loop {
        let mut stop = false;
        let mut disconnected = None;
        select! {
            recv(shutdown) -> _ => stop = true,
            recv(color) -> event => match event {
                Ok(event) => {
                    let mut event = Some(event);
                    run("color", &mut || match event.take() {
                        Some(event) => pipeline.handle_color(event),
                        None => Ok(()),
                    });
                }
                Err(_) => disconnected = Some(StreamKind::Color),
            },
            recv(depth) -> event => match event {
                Ok(event) => {
                    let mut event = Some(event);
                    run("depth", &mut || match event.take() {
                        Some(event) => pipeline.handle_depth(event),
                        None => Ok(()),
                    });
                }
                Err(_) => disconnected = Some(StreamKind::Depth),
            },
            recv(body) -> event => match event {
                Ok(event) => {
                    let mut event = Some(event);
                    run("body", &mut || match (event.take(), face_source.as_deref_mut()) {
                        (Some(event), Some(source)) => pipeline.handle_body(event, source),
                        _ => Ok(()),
                    });
                }
                Err(_) => disconnected = Some(StreamKind::Body),
            },
            recv(face) -> event => match event {
                Ok(event) => {
                    let mut event = Some(event);
                    run("face", &mut || match event.take() {
                        Some(event) => pipeline.handle_face(event),
                        None => Ok(()),
                    });
                }
                Err(_) => disconnected = Some(StreamKind::Face),
            },
        }

        if stop {
            break;
        }
        if let Some(kind) = disconnected {
            log::debug!("{kind:?} stream disconnected");
            match kind {
                StreamKind::Color => color = never(),
                StreamKind::Depth => depth = never(),
                StreamKind::Body => body = never(),
                StreamKind::Face => face = never(),
            }
        }
    }

    // Subscriptions go first, then the face source; the device outlives both.
    drop((color, depth, body, face));
    drop(face_source);
    log::debug!("stream subscriptions released");
    pipeline
}

/// Owns one depth camera and the frame pipeline fed by its streams.
pub struct SensorSession<D: SensorDevice> {
    device: D,
    config: SessionConfig,
    state: SessionState,
    slot: Arc<FrameSlot>,
    tracking: SharedTracking,
    counters: Arc<StreamCounters>,
    dispatcher: Option<Dispatcher>,
    status: String,
}

impl<D: SensorDevice> SensorSession<D> {
    /// Takes the result of a device lookup; `None` means no camera was found.
    pub fn new(device: Option<D>, config: SessionConfig) -> Result<Self> {
        let device = device.ok_or(Error::DeviceUnavailable)?;
        fs::create_dir_all(&config.capture_dir)
            .map_err(|err| Error::io(&config.capture_dir, err))?;

        Ok(Self {
            device,
            config,
            state: SessionState::Closed,
            slot: Arc::new(FrameSlot::new()),
            tracking: Arc::new(Mutex::new(TrackingCorrelator::new())),
            counters: Arc::new(StreamCounters::default()),
            dispatcher: None,
            status: STATUS_READY.to_string(),
        })
    }

    pub fn open(&mut self) -> Result<()> {
        if self.state == SessionState::Opened {
            return Ok(());
        }

        self.device.open()?;
        let streams = match self.open_streams() {
            Ok(streams) => streams,
            Err(err) => {
                if let Err(close_err) = self.device.close() {
                    log::warn!(
                        "failed to close {} after open failure: {close_err:#}",
                        self.device.name()
                    );
                }
                return Err(err);
            }
        };

        let writer = FrameWriter::new(self.slot.clone(), self.config.buffer_format());
        let pipeline = FramePipeline::new(
            writer,
            self.tracking.clone(),
            self.counters.clone(),
            self.config.marker_color,
            self.device.body_count(),
        );
        let dispatcher = match Dispatcher::spawn(streams, pipeline, self.counters.clone()) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                if let Err(close_err) = self.device.close() {
                    log::warn!(
                        "failed to close {} after dispatcher spawn failure: {close_err:#}",
                        self.device.name()
                    );
                }
                return Err(err);
            }
        };

        self.dispatcher = Some(dispatcher);
        self.state = SessionState::Opened;
        log::info!("{} sensor opened in {} mode", self.device.name(), self.config.mode);
        Ok(())
    }

    fn open_streams(&mut self) -> Result<Streams> {
        let mut streams = Streams::default();
        match self.config.mode {
            StreamMode::Color => {
                streams.color = Some(self.device.open_color_reader()?.into_receiver());
            }
            StreamMode::Depth => {
                streams.depth = Some(self.device.open_depth_reader()?.into_receiver());
            }
            StreamMode::FaceOverlay => {
                streams.color = Some(self.device.open_color_reader()?.into_receiver());
                streams.body = Some(self.device.open_body_reader()?.into_receiver());
                let mut face_source = self.device.open_face_source(FaceFrameFeatures::OVERLAY)?;
                streams.face = Some(face_source.open_reader()?.into_receiver());
                streams.face_source = Some(face_source);
            }
        }
        Ok(streams)
    }

    /// Tears the session down in order: dispatcher and subscriptions, device, buffers,
    /// tracking state. Every step runs; the first failure is reported at the end.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let mut first_error: Option<Error> = None;
        let mut pipeline = None;

        if let Some(mut dispatcher) = self.dispatcher.take() {
            match dispatcher.shutdown() {
                Some(Ok(stopped)) => pipeline = Some(stopped),
                Some(Err(_)) => {
                    log::warn!("frame dispatch thread panicked");
                    first_error.get_or_insert(Error::Device(anyhow::anyhow!(
                        "frame dispatch thread panicked"
                    )));
                }
                None => {}
            }
        }

        if let Err(err) = self.device.close() {
            log::warn!("failed to close {}: {err:#}", self.device.name());
            first_error.get_or_insert(Error::Device(err));
        }

        if let Some(mut pipeline) = pipeline {
            pipeline.release();
        }
        self.slot.clear();
        lock_tracking(&self.tracking).reset();

        self.state = SessionState::Closed;
        log::info!("{} sensor closed", self.device.name());
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Single open/close switch; returns the status text to show.
    pub fn toggle(&mut self) -> &str {
        let result = match self.state {
            SessionState::Closed => self.open().map(|()| STATUS_OPENED),
            SessionState::Opened => self.close().map(|()| STATUS_CLOSED),
        };
        self.status = match result {
            Ok(status) => status.to_string(),
            Err(err) => err.to_string(),
        };
        &self.status
    }

    /// Saves the latest frame as a timestamped JPEG in the capture directory.
    pub fn capture(&mut self) -> Result<CaptureOutcome> {
        let latest = self.slot.latest();
        let result = capture::capture_still(
            latest.as_deref(),
            &self.config.capture_dir,
            self.config.jpeg_quality,
        );
        self.status = match &result {
            Ok(outcome) => outcome.status_message(),
            Err(err) => err.to_string(),
        };
        result
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn display(&self) -> DisplayHandle {
        DisplayHandle {
            slot: self.slot.clone(),
        }
    }

    pub fn tracking_state(&self) -> TrackingState {
        lock_tracking(&self.tracking).state()
    }

    pub fn landmarks(&self) -> FaceLandmarks {
        lock_tracking(&self.tracking).landmarks()
    }

    pub fn expression(&self) -> Option<String> {
        lock_tracking(&self.tracking).expression().map(str::to_string)
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }
}

impl<D: SensorDevice> Drop for SensorSession<D> {
    fn drop(&mut self) {
        if self.state == SessionState::Opened {
            if let Err(err) = self.close() {
                log::warn!("sensor teardown incomplete: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_mode_parses_cli_names() {
        assert_eq!("depth".parse::<StreamMode>(), Ok(StreamMode::Depth));
        assert_eq!("face".parse::<StreamMode>(), Ok(StreamMode::FaceOverlay));
        assert_eq!(StreamMode::FaceOverlay.to_string(), "face-overlay");
        assert!("infrared".parse::<StreamMode>().is_err());
    }

    #[test]
    fn depth_mode_forces_three_byte_buffers() {
        let config = SessionConfig {
            mode: StreamMode::Depth,
            display_format: PixelFormat::Rgba32,
            ..SessionConfig::default()
        };
        assert_eq!(config.buffer_format(), PixelFormat::Bgr24);

        let config = SessionConfig {
            mode: StreamMode::Color,
            display_format: PixelFormat::Rgba32,
            ..SessionConfig::default()
        };
        assert_eq!(config.buffer_format(), PixelFormat::Rgba32);
    }
}
