pub mod simulated;

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::{
    error::Result,
    pipeline::{
        compositor::convert_bgra,
        depth_colorizer::DepthRange,
        frame_buffer::PixelFormat,
    },
    types::{BodyRecord, FaceFrameFeatures, FaceFrameResult, TrackingId},
};

pub use simulated::{SimulatedSensor, SimulatorSettings};

/// A depth camera with color, depth and body streams.
///
/// Readers deliver frames over bounded channels; dropping a reader releases its
/// subscription.
pub trait SensorDevice: Send + 'static {
    fn name(&self) -> &str;
    fn open(&mut self) -> anyhow::Result<()>;
    fn close(&mut self) -> anyhow::Result<()>;
    fn is_open(&self) -> bool;
    /// Capacity of the body list delivered with every body frame.
    fn body_count(&self) -> usize;
    fn open_color_reader(&mut self) -> anyhow::Result<FrameReader<ColorFrame>>;
    fn open_depth_reader(&mut self) -> anyhow::Result<FrameReader<DepthFrame>>;
    fn open_body_reader(&mut self) -> anyhow::Result<FrameReader<BodyFrame>>;
    fn open_face_source(
        &mut self,
        features: FaceFrameFeatures,
    ) -> anyhow::Result<Box<dyn FaceTrackingSource>>;
}

/// Face tracker bound to at most one body at a time.
pub trait FaceTrackingSource: Send {
    fn features(&self) -> FaceFrameFeatures;
    /// Whether the id last set still refers to a tracked body.
    fn is_tracking_id_valid(&self) -> bool;
    fn tracking_id(&self) -> Option<TrackingId>;
    fn set_tracking_id(&mut self, id: Option<TrackingId>);
    fn open_reader(&mut self) -> anyhow::Result<FrameReader<FaceFrame>>;
}

/// Notification that a frame arrived. The frame itself may already be gone by the
/// time it is acquired.
#[derive(Debug)]
pub struct FrameArrived<F> {
    frame: Option<F>,
}

impl<F> FrameArrived<F> {
    pub fn new(frame: F) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn expired() -> Self {
        Self { frame: None }
    }

    pub fn acquire_frame(self) -> Option<F> {
        self.frame
    }
}

#[derive(Debug)]
pub struct FrameReader<F> {
    rx: Receiver<FrameArrived<F>>,
}

impl<F> FrameReader<F> {
    pub fn into_receiver(self) -> Receiver<FrameArrived<F>> {
        self.rx
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
    Disconnected,
}

/// Producer side of a [`FrameReader`].
#[derive(Debug)]
pub struct FramePublisher<F> {
    tx: Sender<FrameArrived<F>>,
}

impl<F> Clone for FramePublisher<F> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<F> FramePublisher<F> {
    pub fn publish(&self, frame: F) -> Delivery {
        self.send(FrameArrived::new(frame))
    }

    pub fn publish_expired(&self) -> Delivery {
        self.send(FrameArrived::expired())
    }

    fn send(&self, event: FrameArrived<F>) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }
}

/// One-slot frame channel: a frame published while the previous one is still queued is dropped.
pub fn frame_channel<F>() -> (FramePublisher<F>, FrameReader<F>) {
    let (tx, rx) = bounded(1);
    (FramePublisher { tx }, FrameReader { rx })
}

/// Counts raw buffer locks that have not been released yet.
#[derive(Clone, Debug, Default)]
pub struct LockTracker {
    outstanding: Arc<AtomicUsize>,
}

impl LockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn lock<'a, T>(&self, data: &'a [T]) -> BufferLock<'a, T> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        BufferLock {
            data,
            tracker: self.clone(),
        }
    }
}

/// Scoped access to a frame's raw samples, released on drop.
#[derive(Debug)]
pub struct BufferLock<'a, T> {
    data: &'a [T],
    tracker: LockTracker,
}

impl<T> Deref for BufferLock<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T> Drop for BufferLock<'_, T> {
    fn drop(&mut self) {
        self.tracker.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Color frame in the sensor's native 4-byte BGRA layout.
#[derive(Clone, Debug)]
pub struct ColorFrame {
    width: u32,
    height: u32,
    bgra: Vec<u8>,
    locks: LockTracker,
}

impl ColorFrame {
    pub fn new(width: u32, height: u32, bgra: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bgra,
            locks: LockTracker::new(),
        }
    }

    pub fn with_lock_tracker(mut self, locks: LockTracker) -> Self {
        self.locks = locks;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn lock_raw_buffer(&self) -> BufferLock<'_, u8> {
        self.locks.lock(&self.bgra)
    }

    /// Writes the frame into `dst` converted to `format`, rows `stride` bytes apart.
    pub fn copy_converted_frame_data(
        &self,
        dst: &mut [u8],
        stride: usize,
        format: PixelFormat,
    ) -> Result<()> {
        let raw = self.lock_raw_buffer();
        convert_bgra(&raw, self.width, self.height, dst, stride, format)
    }
}

#[derive(Clone, Debug)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    min_reliable_distance: u16,
    max_reliable_distance: u16,
    samples: Vec<u16>,
    locks: LockTracker,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, range: DepthRange, samples: Vec<u16>) -> Self {
        Self {
            width,
            height,
            min_reliable_distance: range.min_reliable,
            max_reliable_distance: range.max_reliable,
            samples,
            locks: LockTracker::new(),
        }
    }

    pub fn with_lock_tracker(mut self, locks: LockTracker) -> Self {
        self.locks = locks;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn min_reliable_distance(&self) -> u16 {
        self.min_reliable_distance
    }

    pub fn max_reliable_distance(&self) -> u16 {
        self.max_reliable_distance
    }

    pub fn depth_range(&self) -> DepthRange {
        DepthRange::new(self.min_reliable_distance, self.max_reliable_distance)
    }

    pub fn lock_buffer(&self) -> BufferLock<'_, u16> {
        self.locks.lock(&self.samples)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BodyFrame {
    bodies: Vec<BodyRecord>,
}

impl BodyFrame {
    pub fn new(bodies: Vec<BodyRecord>) -> Self {
        Self { bodies }
    }

    /// Copies the frame's bodies into `bodies`; slots the frame does not fill become untracked.
    pub fn get_and_refresh_body_data(&self, bodies: &mut [BodyRecord]) {
        for (idx, slot) in bodies.iter_mut().enumerate() {
            *slot = self.bodies.get(idx).copied().unwrap_or_default();
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FaceFrame {
    tracking_id: Option<TrackingId>,
    result: Option<FaceFrameResult>,
}

impl FaceFrame {
    pub fn new(tracking_id: Option<TrackingId>, result: Option<FaceFrameResult>) -> Self {
        Self {
            tracking_id,
            result,
        }
    }

    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.tracking_id
    }

    pub fn result(&self) -> Option<&FaceFrameResult> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_frame_is_dropped_until_first_is_consumed() {
        let (publisher, reader) = frame_channel::<u32>();
        assert_eq!(publisher.publish(1), Delivery::Delivered);
        assert_eq!(publisher.publish(2), Delivery::Dropped);

        let rx = reader.into_receiver();
        assert_eq!(rx.recv().unwrap().acquire_frame(), Some(1));
        assert_eq!(publisher.publish_expired(), Delivery::Delivered);
        assert_eq!(rx.recv().unwrap().acquire_frame(), None);

        drop(rx);
        assert_eq!(publisher.publish(3), Delivery::Disconnected);
    }

    #[test]
    fn buffer_locks_release_on_drop() {
        let tracker = LockTracker::new();
        let frame = ColorFrame::new(1, 1, vec![1, 2, 3, 4]).with_lock_tracker(tracker.clone());
        {
            let raw = frame.lock_raw_buffer();
            assert_eq!(&raw[..], &[1, 2, 3, 4]);
            assert_eq!(tracker.outstanding(), 1);
        }
        assert_eq!(tracker.outstanding(), 0);

        let mut dst = [0u8; 4];
        frame
            .copy_converted_frame_data(&mut dst, 4, PixelFormat::Rgba32)
            .unwrap();
        assert_eq!(dst, [3, 2, 1, 4]);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn body_refresh_fills_fixed_capacity() {
        let frame = BodyFrame::new(vec![BodyRecord {
            is_tracked: true,
            tracking_id: TrackingId(5),
        }]);
        let mut bodies = [BodyRecord {
            is_tracked: true,
            tracking_id: TrackingId(99),
        }; 3];
        frame.get_and_refresh_body_data(&mut bodies);
        assert_eq!(bodies[0].tracking_id, TrackingId(5));
        assert!(!bodies[1].is_tracked);
        assert!(!bodies[2].is_tracked);
    }
}
