use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use image::{ExtendedColorType, ImageEncoder, codecs::jpeg::JpegEncoder};

use crate::{
    error::{Error, Result},
    pipeline::FrameBuffer,
};

pub const DEFAULT_CAPTURE_DIR: &str = "Capture";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const NO_IMAGE_STATUS: &str = "NO image available!";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(PathBuf),
    NoImage,
}

impl CaptureOutcome {
    pub fn status_message(&self) -> String {
        match self {
            CaptureOutcome::Saved(path) => format!("Image saved as file '{}'", path.display()),
            CaptureOutcome::NoImage => NO_IMAGE_STATUS.to_string(),
        }
    }
}

/// `YYYYMMDDhhmmss.jpg`; two captures within the same second share a name.
pub fn capture_file_name(at: DateTime<Local>) -> String {
    format!("{}.jpg", at.format("%Y%m%d%H%M%S"))
}

pub fn capture_still(frame: Option<&FrameBuffer>, dir: &Path, quality: u8) -> Result<CaptureOutcome> {
    let Some(frame) = frame else {
        log::info!("capture requested before any frame was published");
        return Ok(CaptureOutcome::NoImage);
    };

    let path = dir.join(capture_file_name(Local::now()));
    write_jpeg(frame, &path, quality)?;
    log::info!("saved {}x{} still to {}", frame.width(), frame.height(), path.display());
    Ok(CaptureOutcome::Saved(path))
}

fn write_jpeg(frame: &FrameBuffer, path: &Path, quality: u8) -> Result<()> {
    let rgb = frame.to_rgb_vec();
    let file = File::create(path).map_err(|err| Error::io(path, err))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .write_image(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|source| Error::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    writer
        .into_inner()
        .map_err(|err| Error::io(path, err.into_error()))?;
    Ok(())
}
