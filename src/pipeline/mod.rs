pub mod compositor;
pub mod correlator;
pub mod depth_colorizer;
pub mod face_features;
pub mod frame_buffer;

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    device::{BodyFrame, ColorFrame, DepthFrame, FaceFrame, FaceTrackingSource, FrameArrived},
    error::{Error, Result},
    types::BodyRecord,
};

// Re-exports for convenience
pub use compositor::{DEFAULT_MARKER_COLOR, convert_bgra, draw_face_markers};
pub use correlator::{FaceCommand, TrackingCorrelator};
pub use depth_colorizer::{ChannelOrder, DepthRange, colorize_into, colorize_sample};
pub use face_features::extract_landmarks;
pub use frame_buffer::{FrameBuffer, FrameSlot, FrameWriter, PixelFormat};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub color_frames: u64,
    pub depth_frames: u64,
    pub body_frames: u64,
    pub face_frames: u64,
    pub empty_frames: u64,
    pub failed_frames: u64,
}

#[derive(Debug, Default)]
pub struct StreamCounters {
    color: AtomicU64,
    depth: AtomicU64,
    body: AtomicU64,
    face: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            color_frames: self.color.load(Ordering::Relaxed),
            depth_frames: self.depth.load(Ordering::Relaxed),
            body_frames: self.body.load(Ordering::Relaxed),
            face_frames: self.face.load(Ordering::Relaxed),
            empty_frames: self.empty.load(Ordering::Relaxed),
            failed_frames: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub type SharedTracking = Arc<Mutex<TrackingCorrelator>>;

pub fn lock_tracking(tracking: &SharedTracking) -> MutexGuard<'_, TrackingCorrelator> {
    tracking.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-stream frame handlers. Owned by exactly one thread; the only state it shares is
/// the published frame slot and the tracking correlator.
#[derive(Debug)]
pub struct FramePipeline {
    writer: FrameWriter,
    tracking: SharedTracking,
    counters: Arc<StreamCounters>,
    marker_color: [u8; 3],
    bodies: Vec<BodyRecord>,
}

impl FramePipeline {
    pub fn new(
        writer: FrameWriter,
        tracking: SharedTracking,
        counters: Arc<StreamCounters>,
        marker_color: [u8; 3],
        body_count: usize,
    ) -> Self {
        Self {
            writer,
            tracking,
            counters,
            marker_color,
            bodies: vec![BodyRecord::default(); body_count],
        }
    }

    pub fn handle_color(&mut self, event: FrameArrived<ColorFrame>) -> Result<()> {
        let Some(frame) = self.acquire(event, "color") else {
            return Ok(());
        };

        let landmarks = lock_tracking(&self.tracking).landmarks();
        let marker_color = self.marker_color;
        self.writer
            .write_frame(frame.width(), frame.height(), |buffer| {
                let (stride, format) = (buffer.stride(), buffer.format());
                frame.copy_converted_frame_data(buffer.data_mut(), stride, format)?;
                draw_face_markers(buffer, &landmarks, marker_color);
                Ok(())
            })?;

        StreamCounters::bump(&self.counters.color);
        Ok(())
    }

    pub fn handle_depth(&mut self, event: FrameArrived<DepthFrame>) -> Result<()> {
        let Some(frame) = self.acquire(event, "depth") else {
            return Ok(());
        };

        let order = match self.writer.format() {
            PixelFormat::Bgr24 => ChannelOrder::Bgr,
            other => {
                return Err(Error::Config(format!(
                    "depth frames render into bgr24 buffers, not {other:?}"
                )));
            }
        };
        let (width, height) = (frame.width(), frame.height());
        let range = frame.depth_range();
        self.writer.write_frame(width, height, |buffer| {
            let samples = frame.lock_buffer();
            let stride = buffer.stride();
            colorize_into(&samples, width, height, range, buffer.data_mut(), stride, order)
        })?;

        StreamCounters::bump(&self.counters.depth);
        Ok(())
    }

    /// Refreshes the body list and lets the correlator decide whether the face source
    /// needs a new tracking id.
    pub fn handle_body(
        &mut self,
        event: FrameArrived<BodyFrame>,
        face_source: &mut dyn FaceTrackingSource,
    ) -> Result<()> {
        let Some(frame) = self.acquire(event, "body") else {
            return Ok(());
        };

        frame.get_and_refresh_body_data(&mut self.bodies);
        let face_id_valid = face_source.is_tracking_id_valid();
        let command = lock_tracking(&self.tracking).on_body_frame(&self.bodies, face_id_valid);
        match command {
            Some(FaceCommand::Bind(id)) => face_source.set_tracking_id(Some(id)),
            Some(FaceCommand::Release) => face_source.set_tracking_id(None),
            None => {}
        }

        StreamCounters::bump(&self.counters.body);
        Ok(())
    }

    pub fn handle_face(&mut self, event: FrameArrived<FaceFrame>) -> Result<()> {
        let Some(frame) = self.acquire(event, "face") else {
            return Ok(());
        };

        lock_tracking(&self.tracking).on_face_frame(frame.tracking_id(), frame.result());

        StreamCounters::bump(&self.counters.face);
        Ok(())
    }

    pub fn release(&mut self) {
        self.writer.release();
    }

    fn acquire<F>(&self, event: FrameArrived<F>, stream: &str) -> Option<F> {
        let frame = event.acquire_frame();
        if frame.is_none() {
            log::trace!("{stream} frame expired before it was acquired");
            StreamCounters::bump(&self.counters.empty);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::LockTracker,
        types::{FaceFrameFeatures, FaceFrameResult, PointF, TrackingId},
    };

    struct FakeFaceSource {
        id: Option<TrackingId>,
        valid: bool,
    }

    impl FaceTrackingSource for FakeFaceSource {
        fn features(&self) -> FaceFrameFeatures {
            FaceFrameFeatures::OVERLAY
        }

        fn is_tracking_id_valid(&self) -> bool {
            self.valid
        }

        fn tracking_id(&self) -> Option<TrackingId> {
            self.id
        }

        fn set_tracking_id(&mut self, id: Option<TrackingId>) {
            self.id = id;
        }

        fn open_reader(&mut self) -> anyhow::Result<crate::device::FrameReader<FaceFrame>> {
            anyhow::bail!("not used")
        }
    }

    fn pipeline(format: PixelFormat) -> (FramePipeline, Arc<FrameSlot>, Arc<StreamCounters>) {
        let slot = Arc::new(FrameSlot::new());
        let counters = Arc::new(StreamCounters::default());
        let pipeline = FramePipeline::new(
            FrameWriter::new(slot.clone(), format),
            Arc::new(Mutex::new(TrackingCorrelator::new())),
            counters.clone(),
            DEFAULT_MARKER_COLOR,
            6,
        );
        (pipeline, slot, counters)
    }

    fn tracked(id: u64) -> BodyFrame {
        BodyFrame::new(vec![BodyRecord {
            is_tracked: true,
            tracking_id: TrackingId(id),
        }])
    }

    #[test]
    fn expired_frames_change_nothing() {
        let (mut pipeline, slot, counters) = pipeline(PixelFormat::Bgra32);
        pipeline.handle_color(FrameArrived::expired()).unwrap();
        pipeline.handle_face(FrameArrived::expired()).unwrap();
        assert!(slot.latest().is_none());
        let stats = counters.snapshot();
        assert_eq!(stats.empty_frames, 2);
        assert_eq!(stats.color_frames, 0);
    }

    #[test]
    fn color_frame_is_published_and_lock_released() {
        let (mut pipeline, slot, counters) = pipeline(PixelFormat::Rgba32);
        let locks = LockTracker::new();
        let frame = ColorFrame::new(2, 1, vec![1, 2, 3, 255, 4, 5, 6, 255]).with_lock_tracker(locks.clone());
        pipeline.handle_color(FrameArrived::new(frame)).unwrap();

        let latest = slot.latest().unwrap();
        assert_eq!(latest.data(), &[3, 2, 1, 255, 6, 5, 4, 255]);
        assert_eq!(locks.outstanding(), 0);
        assert_eq!(counters.snapshot().color_frames, 1);
    }

    #[test]
    fn depth_frame_is_colorized() {
        let (mut pipeline, slot, _) = pipeline(PixelFormat::Bgr24);
        let frame = DepthFrame::new(2, 1, DepthRange::new(800, 4000), vec![800, 4000]);
        pipeline.handle_depth(FrameArrived::new(frame)).unwrap();

        let latest = slot.latest().unwrap();
        assert_eq!(latest.pixel_rgb(0, 0), [0, 0, 255]);
        assert_eq!(latest.pixel_rgb(1, 0), [255, 255, 255]);
    }

    #[test]
    fn depth_into_four_byte_buffer_is_refused() {
        let (mut pipeline, slot, _) = pipeline(PixelFormat::Bgra32);
        let frame = DepthFrame::new(1, 1, DepthRange::new(800, 4000), vec![900]);
        assert!(pipeline.handle_depth(FrameArrived::new(frame)).is_err());
        assert!(slot.latest().is_none());
    }

    #[test]
    fn body_frame_binds_face_source() {
        let (mut pipeline, _, _) = pipeline(PixelFormat::Bgra32);
        let mut face = FakeFaceSource {
            id: None,
            valid: false,
        };
        pipeline.handle_body(FrameArrived::new(tracked(7)), &mut face).unwrap();
        assert_eq!(face.id, Some(TrackingId(7)));

        face.valid = true;
        pipeline.handle_body(FrameArrived::new(tracked(8)), &mut face).unwrap();
        assert_eq!(face.id, Some(TrackingId(7)));

        face.valid = false;
        pipeline.handle_body(FrameArrived::new(BodyFrame::default()), &mut face).unwrap();
        assert_eq!(face.id, None);
    }

    #[test]
    fn face_markers_follow_face_frames() {
        let (mut pipeline, slot, _) = pipeline(PixelFormat::Bgra32);
        let mut face = FakeFaceSource {
            id: None,
            valid: false,
        };
        pipeline.handle_body(FrameArrived::new(tracked(1)), &mut face).unwrap();
        let result = FaceFrameResult {
            points_in_color_space: [PointF::new(50.0, 50.0); 5],
            bounding_box: None,
            properties: Vec::new(),
        };
        pipeline
            .handle_face(FrameArrived::new(FaceFrame::new(Some(TrackingId(1)), Some(result))))
            .unwrap();

        let frame = ColorFrame::new(100, 100, vec![0; 100 * 100 * 4]);
        pipeline.handle_color(FrameArrived::new(frame.clone())).unwrap();
        assert_eq!(slot.latest().unwrap().pixel_rgb(50, 50), DEFAULT_MARKER_COLOR);

        pipeline
            .handle_face(FrameArrived::new(FaceFrame::new(Some(TrackingId(1)), None)))
            .unwrap();
        pipeline.handle_color(FrameArrived::new(frame)).unwrap();
        assert_eq!(slot.latest().unwrap().pixel_rgb(50, 50), [0, 0, 0]);
    }
}
