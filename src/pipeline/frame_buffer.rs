use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

use serde::Deserialize;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgr24,
    Bgra32,
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr24 => 3,
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => 4,
        }
    }

    /// Writes an RGB color (alpha opaque) at the start of `dst` in this format's byte order.
    pub fn write_rgb(self, dst: &mut [u8], rgb: [u8; 3]) {
        match self {
            PixelFormat::Bgr24 => {
                dst[0] = rgb[2];
                dst[1] = rgb[1];
                dst[2] = rgb[0];
            }
            PixelFormat::Bgra32 => {
                dst[0] = rgb[2];
                dst[1] = rgb[1];
                dst[2] = rgb[0];
                dst[3] = 255;
            }
            PixelFormat::Rgba32 => {
                dst[0] = rgb[0];
                dst[1] = rgb[1];
                dst[2] = rgb[2];
                dst[3] = 255;
            }
        }
    }

    pub fn read_rgb(self, src: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Bgra32 => [src[2], src[1], src[0]],
            PixelFormat::Rgba32 => [src[0], src[1], src[2]],
        }
    }
}

/// Rows are padded to a multiple of four bytes, like a device-independent bitmap.
pub fn aligned_stride(width: u32, format: PixelFormat) -> usize {
    (width as usize * format.bytes_per_pixel() + 3) & !3
}

#[derive(Clone, Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    sequence: u64,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = aligned_stride(width, format);
        Self {
            width,
            height,
            stride,
            format,
            sequence: 0,
            data: vec![0u8; stride * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }

    pub fn pixel_rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let bpp = self.format.bytes_per_pixel();
        let idx = y as usize * self.stride + x as usize * bpp;
        self.format.read_rgb(&self.data[idx..idx + bpp])
    }

    /// Tightly packed RGB copy, the layout image encoders expect.
    pub fn to_rgb_vec(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for px in self.row(y).chunks_exact(bpp) {
                rgb.extend_from_slice(&self.format.read_rgb(px));
            }
        }
        rgb
    }
}

/// Latest published frame, shared between the pipeline writer and any number of readers.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<FrameBuffer>>>,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<FrameBuffer>> {
        self.lock().clone()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    fn swap(&self, buffer: Arc<FrameBuffer>) -> Option<Arc<FrameBuffer>> {
        let previous = self.lock().replace(buffer);
        self.published.fetch_add(1, Ordering::AcqRel);
        previous
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<FrameBuffer>>> {
        // A panicking reader cannot leave the pointer half-updated.
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single writer for a [`FrameSlot`]. Renders into a private back buffer and publishes
/// it with a pointer swap, recycling the previous front buffer once readers let go of it.
#[derive(Debug)]
pub struct FrameWriter {
    slot: Arc<FrameSlot>,
    format: PixelFormat,
    spare: Option<FrameBuffer>,
    dimensions: Option<(u32, u32)>,
    sequence: u64,
}

impl FrameWriter {
    pub fn new(slot: Arc<FrameSlot>, format: PixelFormat) -> Self {
        Self {
            slot,
            format,
            spare: None,
            dimensions: None,
            sequence: 0,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Renders one frame with `render` and publishes it. Nothing is published when
    /// `render` fails; the back buffer is kept for the next attempt.
    pub fn write_frame<F>(&mut self, width: u32, height: u32, render: F) -> Result<()>
    where
        F: FnOnce(&mut FrameBuffer) -> Result<()>,
    {
        if let Some((w, h)) = self.dimensions {
            if (w, h) != (width, height) {
                log::warn!("sensor resolution changed from {w}x{h} to {width}x{height}, reallocating");
                self.spare = None;
            }
        }
        self.dimensions = Some((width, height));

        let mut buffer = match self.spare.take() {
            Some(buffer) if buffer.matches(width, height, self.format) => buffer,
            _ => FrameBuffer::new(width, height, self.format),
        };

        if let Err(err) = render(&mut buffer) {
            self.spare = Some(buffer);
            return Err(err);
        }

        self.sequence += 1;
        buffer.sequence = self.sequence;
        if let Some(previous) = self.slot.swap(Arc::new(buffer)) {
            // Still held by a reader: let it go and allocate next time.
            if let Ok(previous) = Arc::try_unwrap(previous) {
                self.spare = Some(previous);
            }
        }
        Ok(())
    }

    pub fn release(&mut self) {
        self.spare = None;
        self.dimensions = None;
        self.slot.clear();
    }
}
