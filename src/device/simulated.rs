use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;

use super::{
    BodyFrame, ColorFrame, DepthFrame, Delivery, FaceFrame, FaceTrackingSource, FramePublisher,
    FrameReader, LockTracker, SensorDevice, frame_channel,
};
use crate::{
    pipeline::depth_colorizer::DepthRange,
    types::{
        BodyRecord, DetectionResult, FaceFrameFeatures, FaceFrameResult, FaceProperty, FaceRect,
        PointF, TrackingId,
    },
};

const RELIABLE_RANGE: DepthRange = DepthRange::new(500, 4500);
// Every Nth frame is announced but gone by the time it is acquired.
const EXPIRED_FRAME_EVERY: u64 = 45;
// Every Nth face frame the subject looks away.
const FACE_GAP_EVERY: u64 = 20;
const FIRST_TRACKING_ID: u64 = 72_057_594_037_927_936;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorSettings {
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub fps: u32,
    pub body_count: usize,
    /// Frames a simulated person stays in view before the next one walks in.
    pub body_cycle_frames: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            color_width: 640,
            color_height: 360,
            depth_width: 512,
            depth_height: 424,
            fps: 30,
            body_count: 6,
            body_cycle_frames: 300,
        }
    }
}

impl SimulatorSettings {
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.fps.max(1)))
    }
}

/// What the simulated camera currently sees.
#[derive(Debug, Default)]
struct Scene {
    streaming: AtomicBool,
    /// Id of the person in view, 0 when nobody is.
    tracked_body: AtomicU64,
    face_binding: Mutex<Option<TrackingId>>,
}

impl Scene {
    fn tracked_body(&self) -> Option<TrackingId> {
        match self.tracked_body.load(Ordering::Acquire) {
            0 => None,
            id => Some(TrackingId(id)),
        }
    }

    fn face_binding(&self) -> Option<TrackingId> {
        *self
            .face_binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_face_binding(&self, id: Option<TrackingId>) {
        *self
            .face_binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = id;
    }

    fn face_binding_valid(&self) -> bool {
        match self.face_binding() {
            Some(id) => self.tracked_body() == Some(id),
            None => false,
        }
    }
}

#[derive(Debug)]
struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Producer {
    fn spawn<F, G>(
        name: &str,
        interval: Duration,
        scene: Arc<Scene>,
        publisher: FramePublisher<F>,
        mut generate: G,
    ) -> Result<Self>
    where
        F: Send + 'static,
        G: FnMut(u64) -> F + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("sim-{name}"))
            .spawn(move || {
                let mut index: u64 = 0;
                while !stop_flag.load(Ordering::Relaxed) && scene.streaming.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    index += 1;

                    let delivery = if index % EXPIRED_FRAME_EVERY == 0 {
                        publisher.publish_expired()
                    } else {
                        publisher.publish(generate(index))
                    };
                    if delivery == Delivery::Disconnected {
                        break;
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Synthetic depth camera: moving gradients on the color stream, a sweeping depth
/// ramp, and one person at a time walking in and out of view.
#[derive(Debug)]
pub struct SimulatedSensor {
    settings: SimulatorSettings,
    scene: Arc<Scene>,
    locks: LockTracker,
    producers: Vec<Producer>,
    open: bool,
}

impl SimulatedSensor {
    pub fn get_default(settings: SimulatorSettings) -> Option<Self> {
        Some(Self {
            settings,
            scene: Arc::new(Scene::default()),
            locks: LockTracker::new(),
            producers: Vec::new(),
            open: false,
        })
    }

    pub fn outstanding_locks(&self) -> usize {
        self.locks.outstanding()
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            bail!("simulated sensor is not open");
        }
        Ok(())
    }
}

impl SensorDevice for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.scene.streaming.store(true, Ordering::Release);
        self.open = true;
        log::info!(
            "simulated sensor open (color {}x{}, depth {}x{}, {} fps)",
            self.settings.color_width,
            self.settings.color_height,
            self.settings.depth_width,
            self.settings.depth_height,
            self.settings.fps
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.scene.streaming.store(false, Ordering::Release);
        for mut producer in self.producers.drain(..) {
            producer.stop();
        }
        self.scene.tracked_body.store(0, Ordering::Release);
        self.scene.set_face_binding(None);
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn body_count(&self) -> usize {
        self.settings.body_count
    }

    fn open_color_reader(&mut self) -> Result<FrameReader<ColorFrame>> {
        self.ensure_open()?;
        let (publisher, reader) = frame_channel();
        let (width, height) = (self.settings.color_width, self.settings.color_height);
        let locks = self.locks.clone();
        let producer = Producer::spawn(
            "color",
            self.settings.frame_interval(),
            self.scene.clone(),
            publisher,
            move |index| {
                ColorFrame::new(width, height, gradient_bgra(width, height, index))
                    .with_lock_tracker(locks.clone())
            },
        )?;
        self.producers.push(producer);
        Ok(reader)
    }

    fn open_depth_reader(&mut self) -> Result<FrameReader<DepthFrame>> {
        self.ensure_open()?;
        let (publisher, reader) = frame_channel();
        let (width, height) = (self.settings.depth_width, self.settings.depth_height);
        let locks = self.locks.clone();
        let producer = Producer::spawn(
            "depth",
            self.settings.frame_interval(),
            self.scene.clone(),
            publisher,
            move |index| {
                DepthFrame::new(width, height, RELIABLE_RANGE, depth_sweep(width, height, index))
                    .with_lock_tracker(locks.clone())
            },
        )?;
        self.producers.push(producer);
        Ok(reader)
    }

    fn open_body_reader(&mut self) -> Result<FrameReader<BodyFrame>> {
        self.ensure_open()?;
        let (publisher, reader) = frame_channel();
        let scene = self.scene.clone();
        let body_count = self.settings.body_count.max(1);
        let cycle = self.settings.body_cycle_frames.max(2);
        let producer = Producer::spawn(
            "body",
            self.settings.frame_interval(),
            self.scene.clone(),
            publisher,
            move |index| {
                let round = index / cycle;
                // The last fifth of every round nobody is in view.
                let in_view = index % cycle < cycle - cycle / 5;
                let mut bodies = vec![BodyRecord::default(); body_count];
                if in_view {
                    let id = TrackingId(FIRST_TRACKING_ID + round);
                    bodies[(round as usize) % body_count] = BodyRecord {
                        is_tracked: true,
                        tracking_id: id,
                    };
                    scene.tracked_body.store(id.0, Ordering::Release);
                } else {
                    scene.tracked_body.store(0, Ordering::Release);
                }
                BodyFrame::new(bodies)
            },
        )?;
        self.producers.push(producer);
        Ok(reader)
    }

    fn open_face_source(
        &mut self,
        features: FaceFrameFeatures,
    ) -> Result<Box<dyn FaceTrackingSource>> {
        self.ensure_open()?;
        if !features.contains(FaceFrameFeatures::POINTS_IN_COLOR_SPACE) {
            return Err(anyhow!("face source needs color-space points to locate the face"));
        }
        Ok(Box::new(SimulatedFaceSource {
            features,
            scene: self.scene.clone(),
            settings: self.settings.clone(),
            producer: None,
        }))
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[derive(Debug)]
struct SimulatedFaceSource {
    features: FaceFrameFeatures,
    scene: Arc<Scene>,
    settings: SimulatorSettings,
    producer: Option<Producer>,
}

impl FaceTrackingSource for SimulatedFaceSource {
    fn features(&self) -> FaceFrameFeatures {
        self.features
    }

    fn is_tracking_id_valid(&self) -> bool {
        self.scene.face_binding_valid()
    }

    fn tracking_id(&self) -> Option<TrackingId> {
        self.scene.face_binding()
    }

    fn set_tracking_id(&mut self, id: Option<TrackingId>) {
        self.scene.set_face_binding(id);
    }

    fn open_reader(&mut self) -> Result<FrameReader<FaceFrame>> {
        let (publisher, reader) = frame_channel();
        let scene = self.scene.clone();
        let features = self.features;
        let (width, height) = (self.settings.color_width, self.settings.color_height);
        let producer = Producer::spawn(
            "face",
            self.settings.frame_interval(),
            self.scene.clone(),
            publisher,
            move |index| {
                let binding = scene.face_binding();
                let result = if scene.face_binding_valid() && index % FACE_GAP_EVERY != 0 {
                    Some(synthetic_face(width, height, index, features))
                } else {
                    None
                };
                FaceFrame::new(binding, result)
            },
        )?;
        // Replacing an earlier reader stops its producer.
        self.producer = Some(producer);
        Ok(reader)
    }
}

fn gradient_bgra(width: u32, height: u32, index: u64) -> Vec<u8> {
    let shift = (index * 4 % 256) as u32;
    let mut bgra = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let b = ((x * 255 / width.max(1)) + shift) % 256;
            let g = (y * 255 / height.max(1)) % 256;
            let r = (b + g) / 2;
            bgra.extend_from_slice(&[b as u8, g as u8, r as u8, 255]);
        }
    }
    bgra
}

/// Tilted plane sweeping through and beyond the reliable window so every ramp segment shows up.
fn depth_sweep(width: u32, height: u32, index: u64) -> Vec<u16> {
    let offset = (index * 25 % 2_000) as u32;
    let mut samples = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let value = 200 + x * 4_000 / width.max(1) + y * 1_000 / height.max(1) + offset;
            samples.push(value.min(u32::from(u16::MAX)) as u16);
        }
    }
    samples
}

fn synthetic_face(width: u32, height: u32, index: u64, features: FaceFrameFeatures) -> FaceFrameResult {
    let phase = index as f32 / 30.0;
    let cx = width as f32 / 2.0 + phase.sin() * width as f32 / 8.0;
    let cy = height as f32 / 2.0 + (phase * 0.7).cos() * height as f32 / 10.0;
    let scale = height as f32 / 10.0;

    let points = [
        PointF::new(cx - scale, cy - scale * 0.8),
        PointF::new(cx + scale, cy - scale * 0.8),
        PointF::new(cx, cy),
        PointF::new(cx - scale * 0.7, cy + scale),
        PointF::new(cx + scale * 0.7, cy + scale),
    ];

    let bounding_box = features
        .contains(FaceFrameFeatures::BOUNDING_BOX_IN_COLOR_SPACE)
        .then(|| FaceRect {
            left: (cx - scale * 2.0) as i32,
            top: (cy - scale * 2.0) as i32,
            right: (cx + scale * 2.0) as i32,
            bottom: (cy + scale * 2.0) as i32,
        });

    let smiling = (index / 60) % 2 == 0;
    let requested = [
        (FaceFrameFeatures::FACE_ENGAGEMENT, FaceProperty::Engaged, true),
        (FaceFrameFeatures::GLASSES, FaceProperty::WearingGlasses, false),
        (FaceFrameFeatures::HAPPY, FaceProperty::Happy, smiling),
        (FaceFrameFeatures::LEFT_EYE_CLOSED, FaceProperty::LeftEyeClosed, false),
        (FaceFrameFeatures::RIGHT_EYE_CLOSED, FaceProperty::RightEyeClosed, false),
        (FaceFrameFeatures::MOUTH_OPEN, FaceProperty::MouthOpen, smiling),
    ];
    let properties = requested
        .into_iter()
        .filter(|(feature, _, _)| features.contains(*feature))
        .map(|(_, property, yes)| {
            let detection = if yes {
                DetectionResult::Yes
            } else {
                DetectionResult::No
            };
            (property, detection)
        })
        .collect();

    FaceFrameResult {
        points_in_color_space: points,
        bounding_box,
        properties,
    }
}
