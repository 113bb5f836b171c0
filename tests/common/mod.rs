#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use depthcam::{
    SensorDevice, SessionConfig, StreamMode,
    device::{
        BodyFrame, ColorFrame, DepthFrame, Delivery, FaceFrame, FaceTrackingSource, FramePublisher,
        FrameReader, frame_channel,
    },
    types::{BodyRecord, FaceFrameFeatures, TrackingId},
};

/// Everything the test side can see or drive of a [`MockSensor`].
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub color_readers: AtomicUsize,
    pub depth_readers: AtomicUsize,
    pub body_readers: AtomicUsize,
    pub face_sources: AtomicUsize,
    pub fail_body_reader: AtomicBool,
    pub face_id_valid: AtomicBool,
    pub face_id: Mutex<Option<TrackingId>>,
    /// Whether every stream subscription was already gone when the device closed.
    pub released_before_close: Mutex<Option<bool>>,
    pub color: Mutex<Option<FramePublisher<ColorFrame>>>,
    pub depth: Mutex<Option<FramePublisher<DepthFrame>>>,
    pub body: Mutex<Option<FramePublisher<BodyFrame>>>,
    pub face: Mutex<Option<FramePublisher<FaceFrame>>>,
}

impl Probe {
    pub fn face_id(&self) -> Option<TrackingId> {
        *self.face_id.lock().unwrap()
    }

    pub fn send_color(&self, frame: ColorFrame) -> Delivery {
        deliver(&self.color, frame)
    }

    pub fn send_depth(&self, frame: DepthFrame) -> Delivery {
        deliver(&self.depth, frame)
    }

    pub fn send_body(&self, frame: BodyFrame) -> Delivery {
        deliver(&self.body, frame)
    }

    pub fn send_face(&self, frame: FaceFrame) -> Delivery {
        deliver(&self.face, frame)
    }

    fn all_disconnected(&self) -> bool {
        fn gone<F>(publisher: &Mutex<Option<FramePublisher<F>>>) -> bool {
            match publisher.lock().unwrap().as_ref() {
                Some(publisher) => publisher.publish_expired() == Delivery::Disconnected,
                None => true,
            }
        }
        gone(&self.color) && gone(&self.depth) && gone(&self.body) && gone(&self.face)
    }
}

/// Publishes `frame`, retrying while the one-slot channel still holds an earlier frame.
fn deliver<F: Clone>(publisher: &Mutex<Option<FramePublisher<F>>>, frame: F) -> Delivery {
    let publisher = publisher
        .lock()
        .unwrap()
        .clone()
        .expect("stream was never opened");
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match publisher.publish(frame.clone()) {
            Delivery::Dropped if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            delivery => return delivery,
        }
    }
}

pub struct MockSensor {
    probe: Arc<Probe>,
    open: bool,
}

impl MockSensor {
    pub fn new() -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                probe: probe.clone(),
                open: false,
            },
            probe,
        )
    }
}

impl SensorDevice for MockSensor {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&mut self) -> anyhow::Result<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        *self.probe.released_before_close.lock().unwrap() = Some(self.probe.all_disconnected());
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn body_count(&self) -> usize {
        6
    }

    fn open_color_reader(&mut self) -> anyhow::Result<FrameReader<ColorFrame>> {
        self.probe.color_readers.fetch_add(1, Ordering::SeqCst);
        let (publisher, reader) = frame_channel();
        *self.probe.color.lock().unwrap() = Some(publisher);
        Ok(reader)
    }

    fn open_depth_reader(&mut self) -> anyhow::Result<FrameReader<DepthFrame>> {
        self.probe.depth_readers.fetch_add(1, Ordering::SeqCst);
        let (publisher, reader) = frame_channel();
        *self.probe.depth.lock().unwrap() = Some(publisher);
        Ok(reader)
    }

    fn open_body_reader(&mut self) -> anyhow::Result<FrameReader<BodyFrame>> {
        if self.probe.fail_body_reader.load(Ordering::SeqCst) {
            bail!("body stream unavailable");
        }
        self.probe.body_readers.fetch_add(1, Ordering::SeqCst);
        let (publisher, reader) = frame_channel();
        *self.probe.body.lock().unwrap() = Some(publisher);
        Ok(reader)
    }

    fn open_face_source(
        &mut self,
        features: FaceFrameFeatures,
    ) -> anyhow::Result<Box<dyn FaceTrackingSource>> {
        self.probe.face_sources.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockFaceSource {
            features,
            probe: self.probe.clone(),
        }))
    }
}

struct MockFaceSource {
    features: FaceFrameFeatures,
    probe: Arc<Probe>,
}

impl FaceTrackingSource for MockFaceSource {
    fn features(&self) -> FaceFrameFeatures {
        self.features
    }

    fn is_tracking_id_valid(&self) -> bool {
        self.probe.face_id_valid.load(Ordering::SeqCst)
    }

    fn tracking_id(&self) -> Option<TrackingId> {
        self.probe.face_id()
    }

    fn set_tracking_id(&mut self, id: Option<TrackingId>) {
        *self.probe.face_id.lock().unwrap() = id;
    }

    fn open_reader(&mut self) -> anyhow::Result<FrameReader<FaceFrame>> {
        let (publisher, reader) = frame_channel();
        *self.probe.face.lock().unwrap() = Some(publisher);
        Ok(reader)
    }
}

pub fn config(mode: StreamMode, capture_root: &Path) -> SessionConfig {
    SessionConfig {
        mode,
        capture_dir: capture_root.join("Capture"),
        ..SessionConfig::default()
    }
}

pub fn tracked_bodies(ids: &[u64]) -> BodyFrame {
    BodyFrame::new(
        ids.iter()
            .map(|id| BodyRecord {
                is_tracked: true,
                tracking_id: TrackingId(*id),
            })
            .collect(),
    )
}

/// Polls `condition` until it holds or a few seconds pass.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
