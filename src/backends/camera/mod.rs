// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! A [`CameraProvider`] enumerates devices and opens them asynchronously.
//! Every platform callback is translated into a [`DeviceEvent`] and posted
//! through [`SessionCallbacks`]; the orchestrator consumes these events on
//! its own thread, so no provider callback ever runs orchestrator logic.

pub mod frame_slot;
pub mod pipewire;
pub mod torch;
pub mod types;
pub mod v4l2_controls;

pub use frame_slot::{FrameSlot, FrameTarget};
pub use types::{
    AfMode, CameraControl, CameraDevice, CameraFrame, CaptureRequest, ConcurrencySupport,
    FrameData, IDENTITY_TRANSFORM, RequestTemplate, SensorRotation, rotation_transform,
};

use crate::errors::{CapabilityError, SessionError};
use std::fmt;
use std::sync::Arc;

/// Role a session was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Full-screen source at start, target of camera controls
    Primary,
    /// Continuously streaming inset source
    Secondary,
    /// Short-lived secondary open for a fallback snapshot
    Snapshot,
}

/// Identifies which open request an event belongs to
///
/// The generation increases on every open, so events from a session that
/// was already closed can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTag {
    pub role: SessionRole,
    pub generation: u64,
}

/// Asynchronous notifications from an opened or opening device
pub enum DeviceEvent {
    Opened(Box<dyn CameraHandle>),
    Disconnected,
    Error(SessionError),
    /// Repeating request is running
    Configured,
    ConfigureFailed(SessionError),
    /// Single-shot capture delivered its frame
    CaptureCompleted,
    CaptureFailed(SessionError),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Opened(handle) => write!(f, "Opened({})", handle.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(e) => write!(f, "Error({})", e),
            DeviceEvent::Configured => write!(f, "Configured"),
            DeviceEvent::ConfigureFailed(e) => write!(f, "ConfigureFailed({})", e),
            DeviceEvent::CaptureCompleted => write!(f, "CaptureCompleted"),
            DeviceEvent::CaptureFailed(e) => write!(f, "CaptureFailed({})", e),
        }
    }
}

/// Sink every device event is posted to
pub type EventFn = dyn Fn(SessionTag, DeviceEvent) + Send + Sync;

/// Callback handle given to a provider for one open request
#[derive(Clone)]
pub struct SessionCallbacks {
    tag: SessionTag,
    sink: Arc<EventFn>,
}

impl SessionCallbacks {
    pub fn new(tag: SessionTag, sink: Arc<EventFn>) -> Self {
        Self { tag, sink }
    }

    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    pub fn post(&self, event: DeviceEvent) {
        (self.sink)(self.tag, event);
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("tag", &self.tag)
            .finish()
    }
}

/// Entry point of a camera backend
pub trait CameraProvider: Send + Sync {
    /// List available cameras
    fn enumerate(&self) -> Vec<CameraDevice>;

    /// Check camera and microphone permissions
    fn check_permissions(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    /// Whether `a` and `b` can stream at the same time
    fn concurrency(&self, a: &CameraDevice, b: &CameraDevice) -> ConcurrencySupport;

    /// Start opening `device`; the outcome arrives as `Opened` or `Error`
    ///
    /// Must not block on the device. An `Err` here means the request could
    /// not even be issued.
    fn open(&self, device: &CameraDevice, callbacks: SessionCallbacks) -> Result<(), SessionError>;
}

/// An open camera device
pub trait CameraHandle: Send {
    fn id(&self) -> &str;

    /// Start streaming into `target`; posts `Configured` or `ConfigureFailed`
    fn start_repeating(
        &mut self,
        target: FrameTarget,
        request: &CaptureRequest,
    ) -> Result<(), SessionError>;

    /// Re-issue the repeating request with new parameters
    ///
    /// `Ok(false)` when the device has no control for a changed parameter.
    fn update_request(&mut self, request: &CaptureRequest) -> Result<bool, SessionError>;

    /// Deliver one frame after discarding `settle_frames`; posts
    /// `CaptureCompleted` or `CaptureFailed`
    fn capture_single(
        &mut self,
        target: FrameTarget,
        request: &CaptureRequest,
        settle_frames: u32,
    ) -> Result<(), SessionError>;

    /// Close the device; no events are posted afterwards
    fn close(&mut self);
}
