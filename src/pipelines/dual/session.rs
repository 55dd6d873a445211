// SPDX-License-Identifier: GPL-3.0-only

//! Capture session state machine
//!
//! A session wraps one open request against a [`CameraProvider`]. Device
//! callbacks arrive as [`DeviceEvent`]s on the orchestrator thread and are
//! folded in with [`CaptureSession::handle_event`], which reports what the
//! orchestrator has to react to.
//!
//! ```text
//! Opening ──Opened──▶ Open ──close()──▶ Closed
//!    │                  │
//!    └──Error/Disconnect┴──────────────▶ Error
//! ```

use crate::backends::camera::{
    CameraControl, CameraDevice, CameraHandle, CameraProvider, CaptureRequest, DeviceEvent,
    EventFn, FrameTarget, SessionCallbacks, SessionRole, SessionTag,
};
use crate::errors::SessionError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Opening,
    Open,
    Closed,
    Error,
}

/// What an event meant for the session
#[derive(Debug)]
pub enum SessionTransition {
    /// Opening finished; the device is ready for a request
    Opened,
    /// The repeating or single-shot request is running
    Configured,
    /// Single-shot capture delivered its frame
    CaptureCompleted,
    /// The session moved to `Error`; the handle is already closed
    Failed(SessionError),
    /// A single-shot capture failed; the session itself is still open
    CaptureFailed(SessionError),
    /// Event had no effect (late event for a closed session)
    Ignored,
}

pub struct CaptureSession {
    tag: SessionTag,
    device: CameraDevice,
    status: SessionStatus,
    handle: Option<Box<dyn CameraHandle>>,
    request: CaptureRequest,
}

impl CaptureSession {
    /// Issue an open request; the result arrives as a device event
    pub fn open(
        provider: &dyn CameraProvider,
        device: &CameraDevice,
        tag: SessionTag,
        request: CaptureRequest,
        sink: Arc<EventFn>,
    ) -> Result<Self, SessionError> {
        info!(
            id = %device.id,
            name = %device.name,
            role = ?tag.role,
            generation = tag.generation,
            "Opening camera"
        );
        provider.open(device, SessionCallbacks::new(tag, sink))?;
        Ok(Self {
            tag,
            device: device.clone(),
            status: SessionStatus::Opening,
            handle: None,
            request,
        })
    }

    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    pub fn role(&self) -> SessionRole {
        self.tag.role
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Fold a device event into the session
    pub fn handle_event(&mut self, event: DeviceEvent) -> SessionTransition {
        match (self.status, event) {
            (SessionStatus::Opening, DeviceEvent::Opened(handle)) => {
                debug!(id = %self.device.id, "Camera opened");
                self.handle = Some(handle);
                self.status = SessionStatus::Open;
                SessionTransition::Opened
            }
            (_, DeviceEvent::Opened(mut handle)) => {
                // Opened after close: release the device right away
                debug!(id = %self.device.id, status = ?self.status, "Closing late-opened camera");
                handle.close();
                SessionTransition::Ignored
            }
            (SessionStatus::Closed | SessionStatus::Error, event) => {
                debug!(id = %self.device.id, ?event, "Ignoring event for inactive session");
                SessionTransition::Ignored
            }
            (_, DeviceEvent::Disconnected) => {
                self.fail(SessionError::Disconnected(self.device.id.clone()))
            }
            (SessionStatus::Opening, DeviceEvent::Error(e)) => {
                let reason = e.to_string();
                self.fail(match e {
                    SessionError::OpenFailed { .. } => e,
                    _ => SessionError::OpenFailed {
                        id: self.device.id.clone(),
                        reason,
                    },
                })
            }
            (_, DeviceEvent::Error(e)) | (_, DeviceEvent::ConfigureFailed(e)) => self.fail(e),
            (SessionStatus::Open, DeviceEvent::Configured) => SessionTransition::Configured,
            (SessionStatus::Open, DeviceEvent::CaptureCompleted) => {
                SessionTransition::CaptureCompleted
            }
            (SessionStatus::Open, DeviceEvent::CaptureFailed(e)) => {
                SessionTransition::CaptureFailed(e)
            }
            (SessionStatus::Opening, event) => {
                warn!(id = %self.device.id, ?event, "Unexpected event while opening");
                SessionTransition::Ignored
            }
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionTransition {
        warn!(
            id = %self.device.id,
            role = ?self.tag.role,
            error = %error,
            "Capture session failed"
        );
        self.release_handle();
        self.status = SessionStatus::Error;
        SessionTransition::Failed(error)
    }

    fn handle_mut(&mut self) -> Result<&mut Box<dyn CameraHandle>, SessionError> {
        match (self.status, self.handle.as_mut()) {
            (SessionStatus::Open, Some(handle)) => Ok(handle),
            _ => Err(SessionError::NotOpen),
        }
    }

    /// Stream continuously into `target`
    pub fn start_repeating(&mut self, target: FrameTarget) -> Result<(), SessionError> {
        let request = self.request.clone();
        self.handle_mut()?.start_repeating(target, &request)?;
        self.request.af_trigger = false;
        Ok(())
    }

    /// Deliver one settled frame into `target`
    pub fn capture_single(
        &mut self,
        target: FrameTarget,
        settle_frames: u32,
    ) -> Result<(), SessionError> {
        let request = self.request.clone();
        self.handle_mut()?
            .capture_single(target, &request, settle_frames)
    }

    /// Apply a runtime control
    ///
    /// The control is kept in the session's request even when the device
    /// cannot take it right now. Returns whether the device applied it.
    pub fn apply_control(&mut self, control: CameraControl) -> Result<bool, SessionError> {
        control.apply(&mut self.request);
        if !self.is_open() {
            debug!(id = %self.device.id, ?control, "Session not open, control stored only");
            return Ok(false);
        }
        let request = self.request.clone();
        let applied = self.handle_mut()?.update_request(&request);
        // Trigger is one-shot whether or not the device took it
        self.request.af_trigger = false;
        if let Ok(false) = applied {
            debug!(id = %self.device.id, ?control, "Control not supported by device");
        }
        applied
    }

    fn release_handle(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Close the device; returns whether a handle was released
    ///
    /// A second call, or a call after an error, releases nothing.
    pub fn close(&mut self) -> bool {
        let released = self.release_handle();
        if self.status != SessionStatus::Error {
            self.status = SessionStatus::Closed;
        }
        if released {
            info!(id = %self.device.id, role = ?self.tag.role, "Camera closed");
        }
        released
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{ConcurrencySupport, SensorRotation};
    use crate::pipelines::dual::layout::CameraFacing;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        closes: u32,
        updates: Vec<CaptureRequest>,
        unsupported: bool,
        fail: bool,
    }

    struct FakeHandle(Arc<Mutex<Log>>);

    impl CameraHandle for FakeHandle {
        fn id(&self) -> &str {
            "fake"
        }
        fn start_repeating(
            &mut self,
            _: FrameTarget,
            _: &CaptureRequest,
        ) -> Result<(), SessionError> {
            Ok(())
        }
        fn update_request(&mut self, request: &CaptureRequest) -> Result<bool, SessionError> {
            let mut log = self.0.lock();
            if log.fail {
                return Err(SessionError::Control {
                    id: "fake".into(),
                    reason: "EIO".into(),
                });
            }
            log.updates.push(request.clone());
            Ok(!log.unsupported)
        }
        fn capture_single(
            &mut self,
            _: FrameTarget,
            _: &CaptureRequest,
            _: u32,
        ) -> Result<(), SessionError> {
            Ok(())
        }
        fn close(&mut self) {
            self.0.lock().closes += 1;
        }
    }

    struct NoopProvider;

    impl CameraProvider for NoopProvider {
        fn enumerate(&self) -> Vec<CameraDevice> {
            Vec::new()
        }
        fn concurrency(&self, _: &CameraDevice, _: &CameraDevice) -> ConcurrencySupport {
            ConcurrencySupport::Unknown
        }
        fn open(&self, _: &CameraDevice, _: SessionCallbacks) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn session() -> CaptureSession {
        let device = CameraDevice {
            id: "cam0".into(),
            name: "Camera".into(),
            facing: CameraFacing::Back,
            rotation: SensorRotation::None,
            v4l2_path: None,
        };
        let tag = SessionTag {
            role: SessionRole::Primary,
            generation: 1,
        };
        let sink = Arc::new(|_: SessionTag, _: DeviceEvent| {});
        CaptureSession::open(&NoopProvider, &device, tag, CaptureRequest::record(), sink).unwrap()
    }

    #[test]
    fn test_open_then_close_releases_once() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut s = session();
        assert_eq!(s.status(), SessionStatus::Opening);
        assert!(matches!(
            s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log))))),
            SessionTransition::Opened
        ));
        assert!(s.is_open());
        assert!(s.close());
        assert!(!s.close());
        assert_eq!(s.status(), SessionStatus::Closed);
        assert_eq!(log.lock().closes, 1);
    }

    #[test]
    fn test_disconnect_moves_to_error() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut s = session();
        s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log)))));
        assert!(matches!(
            s.handle_event(DeviceEvent::Disconnected),
            SessionTransition::Failed(SessionError::Disconnected(_))
        ));
        assert_eq!(s.status(), SessionStatus::Error);
        // Stop after an error must not close twice
        assert!(!s.close());
        assert_eq!(s.status(), SessionStatus::Error);
        assert_eq!(log.lock().closes, 1);
    }

    #[test]
    fn test_open_error_is_open_failed() {
        let mut s = session();
        let t = s.handle_event(DeviceEvent::Error(SessionError::Device {
            id: "cam0".into(),
            reason: "busy".into(),
        }));
        assert!(matches!(t, SessionTransition::Failed(SessionError::OpenFailed { .. })));
    }

    #[test]
    fn test_late_open_is_closed_immediately() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut s = session();
        s.close();
        assert!(matches!(
            s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log))))),
            SessionTransition::Ignored
        ));
        assert_eq!(log.lock().closes, 1);
        assert!(!s.is_open());
    }

    #[test]
    fn test_controls_stored_when_not_open() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut s = session();
        assert!(!s.apply_control(CameraControl::Torch(true)).unwrap());
        assert!(s.request().torch);

        s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log)))));
        assert!(s.apply_control(CameraControl::AfTrigger).unwrap());
        let log = log.lock();
        let updates = &log.updates;
        assert_eq!(updates.len(), 1);
        assert!(updates[0].torch && updates[0].af_trigger);
        // Trigger is one-shot
        assert!(!s.request().af_trigger);
    }

    #[test]
    fn test_unsupported_control_reports_false() {
        let log = Arc::new(Mutex::new(Log {
            unsupported: true,
            ..Log::default()
        }));
        let mut s = session();
        s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log)))));

        assert!(!s.apply_control(CameraControl::Zoom(2.0)).unwrap());
        // Still stored for the next restart
        assert_eq!(s.request().zoom_ratio, 2.0);
        assert_eq!(log.lock().updates.len(), 1);
    }

    #[test]
    fn test_failed_control_is_error() {
        let log = Arc::new(Mutex::new(Log {
            fail: true,
            ..Log::default()
        }));
        let mut s = session();
        s.handle_event(DeviceEvent::Opened(Box::new(FakeHandle(Arc::clone(&log)))));

        let err = s.apply_control(CameraControl::AfTrigger).unwrap_err();
        assert!(matches!(err, SessionError::Control { .. }));
        assert!(!s.request().af_trigger);
        assert!(s.is_open());
    }
}
