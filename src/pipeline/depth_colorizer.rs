use rayon::prelude::*;

use crate::error::{Error, Result};

/// Reliable distance window reported by the sensor with every depth frame, in millimeters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthRange {
    pub min_reliable: u16,
    pub max_reliable: u16,
}

impl DepthRange {
    pub const fn new(min_reliable: u16, max_reliable: u16) -> Self {
        Self {
            min_reliable,
            max_reliable,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

const BLACK: [u8; 3] = [0, 0, 0];
const WHITE: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug)]
struct Ramp {
    min: i32,
    max: i32,
    quarter: i32,
    ratio: i32,
}

impl Ramp {
    fn new(range: DepthRange) -> Self {
        let min = range.min_reliable as i32;
        let max = range.max_reliable as i32;
        let span = max - min;
        Self {
            min,
            max,
            quarter: span / 4,
            ratio: span / 256,
        }
    }

    fn color(&self, sample: u16) -> [u8; 3] {
        let d = sample as i32;
        if d < self.min {
            return BLACK;
        }
        if d >= self.max {
            return WHITE;
        }
        if self.ratio <= 0 {
            // Window narrower than the ramp resolution: snap to the closer edge.
            return if d - self.min < self.max - d { BLACK } else { WHITE };
        }

        let g = (d - self.min) / self.ratio;
        if d < self.min + self.quarter {
            [0, clamp_channel(4 * g), 255]
        } else if d < self.min + 2 * self.quarter {
            [0, 255, clamp_channel(-4 * g + 510)]
        } else if d < self.min + 3 * self.quarter {
            [clamp_channel(4 * g - 510), 255, 0]
        } else {
            [255, clamp_channel(-4 * g + 1020), 0]
        }
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Maps one depth sample to an RGB triple using the six-segment false-color ramp:
/// black below the reliable window, blue → cyan → green → yellow → red across it,
/// white at or beyond its far edge.
pub fn colorize_sample(sample: u16, range: DepthRange) -> [u8; 3] {
    Ramp::new(range).color(sample)
}

/// Colorizes a row-major `width * height` depth buffer into `out`, three bytes per pixel.
///
/// `stride` is the byte distance between output rows; bytes between `3 * width` and
/// `stride` are left untouched so callers can colorize straight into padded bitmaps.
pub fn colorize_into(
    depth: &[u16],
    width: u32,
    height: u32,
    range: DepthRange,
    out: &mut [u8],
    stride: usize,
    order: ChannelOrder,
) -> Result<()> {
    let width = width as usize;
    let height = height as usize;
    let row_bytes = width * 3;
    if stride < row_bytes {
        return Err(Error::BufferSize {
            expected: row_bytes,
            actual: stride,
        });
    }
    Error::check_len(width * height, depth.len())?;
    if height > 0 {
        Error::check_len(stride * (height - 1) + row_bytes, out.len())?;
    }
    if width == 0 || height == 0 {
        return Ok(());
    }

    let ramp = Ramp::new(range);
    out.par_chunks_mut(stride)
        .take(height)
        .zip(depth.par_chunks_exact(width))
        .for_each(|(dst_row, src_row)| {
            for (dst, &sample) in dst_row[..row_bytes].chunks_exact_mut(3).zip(src_row) {
                let [r, g, b] = ramp.color(sample);
                match order {
                    ChannelOrder::Rgb => dst.copy_from_slice(&[r, g, b]),
                    ChannelOrder::Bgr => dst.copy_from_slice(&[b, g, r]),
                }
            }
        });

    Ok(())
}
