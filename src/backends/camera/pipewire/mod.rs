// SPDX-License-Identifier: MPL-2.0

//! PipeWire camera backend
//!
//! Enumeration goes through `pw-cli`; capture runs one GStreamer
//! `pipewiresrc` pipeline per open session. Runtime controls bypass
//! PipeWire and go to the V4L2 node and LEDs directly.

mod controls;
mod enumeration;
mod pipeline;

pub use enumeration::{
    VideoNode, assign_facing, enumerate_pipewire_cameras, is_pipewire_available,
    parse_pw_cli_nodes, target_object,
};
pub use controls::DeviceControls;
pub use pipeline::PipeWireCapture;

use super::types::{CameraDevice, ConcurrencySupport};
use super::{CameraProvider, DeviceEvent, SessionCallbacks};
use crate::errors::{CapabilityError, SessionError};
use tracing::{debug, info};

/// Camera provider backed by PipeWire
#[derive(Debug, Default, Clone, Copy)]
pub struct PipeWireProvider;

impl PipeWireProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CameraProvider for PipeWireProvider {
    fn enumerate(&self) -> Vec<CameraDevice> {
        info!("Using PipeWire backend for camera enumeration");
        enumerate_pipewire_cameras()
    }

    fn check_permissions(&self) -> Result<(), CapabilityError> {
        // Access is mediated by the PipeWire session manager; without
        // pipewiresrc nothing can be captured at all
        if is_pipewire_available() {
            Ok(())
        } else {
            Err(CapabilityError::NoCameraFound)
        }
    }

    fn concurrency(&self, a: &CameraDevice, b: &CameraDevice) -> ConcurrencySupport {
        // PipeWire does not advertise combinations; opening the second
        // device decides
        debug!(a = %a.id, b = %b.id, "Concurrency unknown for PipeWire cameras");
        ConcurrencySupport::Unknown
    }

    fn open(&self, device: &CameraDevice, callbacks: SessionCallbacks) -> Result<(), SessionError> {
        let id = device.id.clone();
        let device = device.clone();

        std::thread::Builder::new()
            .name(format!("dualcam-open-{}", device.id))
            .spawn(move || match PipeWireCapture::open(&device, callbacks.clone()) {
                Ok(capture) => callbacks.post(DeviceEvent::Opened(Box::new(capture))),
                Err(e) => callbacks.post(DeviceEvent::Error(e)),
            })
            .map(|_| ())
            .map_err(|e| SessionError::OpenFailed {
                id,
                reason: format!("Failed to spawn opener thread: {}", e),
            })
    }
}
