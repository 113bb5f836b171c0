use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open sensor: no depth camera found")]
    DeviceUnavailable,

    #[error("sensor device error: {0:#}")]
    Device(#[from] anyhow::Error),

    #[error("buffer too small: got {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
        if actual < expected {
            return Err(Error::BufferSize { expected, actual });
        }
        Ok(())
    }
}
