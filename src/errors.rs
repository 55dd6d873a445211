// SPDX-License-Identifier: MPL-2.0

//! Error types for the dual-camera recorder
//!
//! The variants follow how a failure is handled:
//! - [`CapabilityError`]: found before any hardware is opened, reported once
//! - [`SessionError`]: capture device open/disconnect/error callbacks
//! - [`PipelineError`]: encoder, muxer, sink or GPU setup, always fatal
//! - [`FrameError`]: a single render pass or snapshot attempt, logged and skipped

use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main error type
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Configuration error: {0}")]
    Config(String),
    /// Command rejected in the current recorder state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Problems detected before any capture device is opened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("Camera or microphone permission denied")]
    PermissionDenied,
    #[error("No camera devices found")]
    NoCameraFound,
    #[error("Device cannot run two capture sessions concurrently")]
    ConcurrencyUnsupported,
}

/// Capture session failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Failed to open camera {id}: {reason}")]
    OpenFailed { id: String, reason: String },
    #[error("Camera {0} disconnected")]
    Disconnected(String),
    #[error("Camera {id} reported error: {reason}")]
    Device { id: String, reason: String },
    #[error("Failed to configure capture on {id}: {reason}")]
    ConfigureFailed { id: String, reason: String },
    #[error("Single-shot capture failed on {id}: {reason}")]
    CaptureFailed { id: String, reason: String },
    #[error("Failed to apply control on {id}: {reason}")]
    Control { id: String, reason: String },
    #[error("Camera session is not open")]
    NotOpen,
}

/// Fatal setup or runtime failures of the encoding pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Encoder not available: {0}")]
    EncoderNotAvailable(String),
    #[error("Encoder failure: {0}")]
    Encoder(#[from] EncoderError),
    #[error("Muxer failure: {0}")]
    Muxer(#[from] MuxerError),
    #[error("Compositor failure: {0}")]
    Compositor(#[from] CompositorError),
    #[error("Output sink unavailable: {0}")]
    Sink(String),
    #[error("Audio capture failure: {0}")]
    Audio(String),
    #[error("Worker thread failure: {0}")]
    Thread(String),
}

/// Transient failures that never change pipeline state
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    #[error("Render pass failed: {0}")]
    Render(#[from] CompositorError),
    #[error("Snapshot attempt failed: {0}")]
    Snapshot(#[from] SessionError),
}

/// Errors raised by an encoder's push/pull queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error("Failed to create encoder: {0}")]
    Create(String),
    #[error("Failed to queue input: {0}")]
    Input(String),
    #[error("Failed to dequeue output: {0}")]
    Output(String),
    #[error("Encoder already released")]
    Released,
}

/// Errors raised by the container writer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxerError {
    #[error("Failed to create muxer: {0}")]
    Create(String),
    #[error("Track rejected: {0}")]
    Track(String),
    #[error("Muxer already started")]
    AlreadyStarted,
    #[error("Muxer not started")]
    NotStarted,
    #[error("Failed to write sample: {0}")]
    Write(String),
    #[error("Failed to finalize container: {0}")]
    Finalize(String),
}

/// Errors raised by a compositing context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositorError {
    #[error("GPU initialization failed: {0}")]
    Init(String),
    #[error("Unknown rendering program: {0}")]
    UnknownProgram(String),
    #[error("Frame sink not created")]
    MissingSink,
    #[error("Frame upload failed: {0}")]
    Upload(String),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Present failed: {0}")]
    Present(String),
    #[error("Compositor released")]
    Released,
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Config(msg)
    }
}
