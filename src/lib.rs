//! Frame pipeline for a multi-stream depth camera.
//!
//! A [`SensorSession`] opens the camera's color, depth, body and face streams,
//! renders each arriving frame into a shared [`pipeline::FrameBuffer`] and keeps
//! the face tracker bound to the first tracked body.

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod types;

pub use capture::CaptureOutcome;
pub use config::PipelineConfig;
pub use device::{SensorDevice, SimulatedSensor};
pub use error::{Error, Result};
pub use session::{DisplayHandle, SensorSession, SessionConfig, SessionState, StreamMode};
