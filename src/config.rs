use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    capture::{DEFAULT_CAPTURE_DIR, DEFAULT_JPEG_QUALITY},
    device::SimulatorSettings,
    error::{Error, Result},
    pipeline::{DEFAULT_MARKER_COLOR, PixelFormat},
    session::{SessionConfig, StreamMode},
};

/// Top-level settings file. Every table and key is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub log_level: String,
    pub session: SessionSection,
    pub capture: CaptureSection,
    pub simulator: SimulatorSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub mode: StreamMode,
    pub display_format: PixelFormat,
    pub marker_color: [u8; 3],
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    pub dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            session: SessionSection::default(),
            capture: CaptureSection::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            display_format: PixelFormat::Bgra32,
            marker_color: DEFAULT_MARKER_COLOR,
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(Error::Config(format!(
                "capture.jpeg_quality must be within 1..=100, got {}",
                self.capture.jpeg_quality
            )));
        }
        if self.simulator.fps == 0 {
            return Err(Error::Config("simulator.fps must be positive".to_string()));
        }
        if self.simulator.body_count == 0 {
            return Err(Error::Config("simulator.body_count must be positive".to_string()));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: self.session.mode,
            display_format: self.session.display_format,
            marker_color: self.session.marker_color,
            capture_dir: self.capture.dir.clone(),
            jpeg_quality: self.capture.jpeg_quality,
        }
    }
}
