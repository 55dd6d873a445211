// SPDX-License-Identifier: GPL-3.0-only

//! Dual-camera picture-in-picture recording
//!
//! ```text
//! ┌────────────┐   FrameSlot 0   ┌────────────┐   ┌─────────┐
//! │  Primary   │ ──────────────▶ │            │   │  Video  │
//! │  camera    │                 │ Compositor │──▶│ encoder │──┐
//! └────────────┘   FrameSlot 1   │   (wgpu)   │   └─────────┘  │  ┌───────┐
//! ┌────────────┐ ──────────────▶ │            │                ├─▶│ Muxer │
//! │ Secondary  │                 └────────────┘   ┌─────────┐  │  └───────┘
//! │ or snapshot│                                  │  Audio  │──┘
//! └────────────┘                                  │ encoder │
//!                                                 └─────────┘
//! ```
//!
//! [`DualCameraRecorder`] drives the capture sessions and owns one
//! [`EncodingPipeline`] per recording.

pub mod backend;
pub mod clock;
pub mod compositor;
pub mod container;
pub mod drain;
pub mod encoding;
pub mod events;
pub mod frame_loop;
pub mod geometry;
pub mod layout;
pub mod muxer;
pub mod orchestrator;
pub mod session;
pub mod snapshot;

pub use backend::{GstMediaBackend, MediaBackend};
pub use clock::PipelineClock;
pub use compositor::{CompositingContext, Compositor, CompositorControls};
pub use encoding::{AudioConfig, EncodingConfig, EncodingPipeline, StopReport};
pub use events::{LifecycleEvent, OperatingMode, OutputSink, PipelineStats, StatsSnapshot};
pub use geometry::{PipGeometry, compute_geometry};
pub use layout::{CameraFacing, Layout, PipConfig, PipPosition, PipSize};
pub use muxer::{GstMuxer, Muxer, MuxerOptions};
pub use orchestrator::{
    DualCameraRecorder, RecorderState, RecordingRequest, TimingConfig, WatermarkSupplier,
    select_devices,
};
pub use session::{CaptureSession, SessionStatus};
pub use snapshot::FallbackSnapshotScheduler;
