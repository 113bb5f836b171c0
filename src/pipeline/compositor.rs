use rayon::prelude::*;

use super::frame_buffer::{FrameBuffer, PixelFormat};
use crate::{
    error::{Error, Result},
    types::FaceLandmarks,
};

pub const DEFAULT_MARKER_COLOR: [u8; 3] = [255, 0, 0];

const EYE_MARKER_SIZE: (i64, i64) = (60, 40);
const NOSE_MARKER_SIZE: (i64, i64) = (40, 40);
const NOSE_MARKER_OFFSET: (i64, i64) = (20, 30);
const MOUTH_MARKER_HEIGHT: i64 = 40;

/// Converts a packed BGRA sensor buffer into `dst` laid out as `format` with `stride` bytes per row.
pub fn convert_bgra(
    src: &[u8],
    width: u32,
    height: u32,
    dst: &mut [u8],
    stride: usize,
    format: PixelFormat,
) -> Result<()> {
    let width = width as usize;
    let height = height as usize;
    let bpp = format.bytes_per_pixel();
    let row_bytes = width * bpp;
    if stride < row_bytes {
        return Err(Error::BufferSize {
            expected: row_bytes,
            actual: stride,
        });
    }
    Error::check_len(width * height * 4, src.len())?;
    if height > 0 {
        Error::check_len(stride * (height - 1) + row_bytes, dst.len())?;
    }
    if width == 0 || height == 0 {
        return Ok(());
    }

    dst.par_chunks_mut(stride)
        .take(height)
        .zip(src.par_chunks_exact(width * 4))
        .for_each(|(dst_row, src_row)| match format {
            PixelFormat::Bgra32 => dst_row[..row_bytes].copy_from_slice(src_row),
            PixelFormat::Bgr24 => {
                for (d, s) in dst_row[..row_bytes]
                    .chunks_exact_mut(3)
                    .zip(src_row.chunks_exact(4))
                {
                    d.copy_from_slice(&s[..3]);
                }
            }
            PixelFormat::Rgba32 => {
                for (d, s) in dst_row[..row_bytes]
                    .chunks_exact_mut(4)
                    .zip(src_row.chunks_exact(4))
                {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = s[3];
                }
            }
        });

    Ok(())
}

/// Draws the face markers over `buffer`: one ellipse per eye, one on the nose and one
/// spanning the mouth corners. Does nothing when no face is present.
pub fn draw_face_markers(buffer: &mut FrameBuffer, landmarks: &FaceLandmarks, color: [u8; 3]) {
    if !landmarks.present {
        return;
    }

    // Landmarks can sit anywhere in i32 range; box math is done in i64.
    let (eye_w, eye_h) = EYE_MARKER_SIZE;
    for eye in [landmarks.left_eye, landmarks.right_eye] {
        let (x, y) = (i64::from(eye.x), i64::from(eye.y));
        fill_ellipse(buffer, x - eye_w / 2, y - eye_h / 2, eye_w, eye_h, color);
    }

    let (nose_w, nose_h) = NOSE_MARKER_SIZE;
    let (nose_dx, nose_dy) = NOSE_MARKER_OFFSET;
    let (x, y) = (i64::from(landmarks.nose.x), i64::from(landmarks.nose.y));
    fill_ellipse(buffer, x - nose_dx, y - nose_dy, nose_w, nose_h, color);

    let (left, right) = (landmarks.mouth_left, landmarks.mouth_right);
    fill_ellipse(
        buffer,
        i64::from(left.x),
        i64::from(left.y) - MOUTH_MARKER_HEIGHT / 2,
        i64::from(right.x) - i64::from(left.x),
        MOUTH_MARKER_HEIGHT,
        color,
    );
}

/// Fills the ellipse inscribed in the box at (`x`, `y`) of size `w` x `h`.
fn fill_ellipse(buffer: &mut FrameBuffer, x: i64, y: i64, w: i64, h: i64, color: [u8; 3]) {
    if w <= 0 || h <= 0 {
        return;
    }

    let y_start = y.max(0);
    let y_end = (y + h).min(i64::from(buffer.height()));
    let x_start = x.max(0);
    let x_end = (x + w).min(i64::from(buffer.width()));
    if y_start >= y_end || x_start >= x_end {
        return;
    }

    let rx = w as f64 / 2.0;
    let ry = h as f64 / 2.0;
    let cx = x as f64 + rx;
    let cy = y as f64 + ry;

    for py in y_start..y_end {
        let ny = (py as f64 + 0.5 - cy) / ry;
        for px in x_start..x_end {
            let nx = (px as f64 + 0.5 - cx) / rx;
            if nx * nx + ny * ny <= 1.0 {
                put_pixel_safe(buffer, px, py, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut FrameBuffer, x: i64, y: i64, color: [u8; 3]) {
    if x < 0 || y < 0 || x >= i64::from(buffer.width()) || y >= i64::from(buffer.height()) {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    let format = buffer.format();
    let bpp = format.bytes_per_pixel();
    let idx = uy as usize * buffer.stride() + ux as usize * bpp;
    let data = buffer.data_mut();
    if idx + bpp <= data.len() {
        format.write_rgb(&mut data[idx..idx + bpp], color);
    }
}
