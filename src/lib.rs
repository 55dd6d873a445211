// SPDX-License-Identifier: MPL-2.0

//! DualCam - picture-in-picture recording from two cameras
//!
//! Two cameras are composited into one frame on the GPU, encoded together
//! with microphone audio and written to a single MP4 file. When the device
//! cannot stream both cameras at once the second camera is refreshed with
//! periodic snapshots instead.
//!
//! - [`backends`]: Camera and audio capture
//! - [`pipelines`]: Orchestrator, compositor and encoding pipeline
//! - [`media`]: Encoder selection and GStreamer encoder wrappers
//! - [`gpu`]: wgpu device setup and readback helpers
//! - [`shaders`]: WGSL compositor programs
//! - [`config`]: Recorder settings
//!
//! # Example
//!
//! ```ignore
//! use dualcam::backends::camera::pipewire::PipeWireProvider;
//! use dualcam::pipelines::dual::{DualCameraRecorder, GstMediaBackend};
//! use std::sync::Arc;
//!
//! let (recorder, mut events) =
//!     DualCameraRecorder::new(Arc::new(PipeWireProvider::new()), Arc::new(GstMediaBackend))?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod shaders;

// Re-export commonly used types
pub use config::RecorderSettings;
pub use constants::BitratePreset;
pub use errors::{AppError, AppResult};
pub use pipelines::dual::{
    DualCameraRecorder, LifecycleEvent, OperatingMode, PipConfig, RecorderState,
};
