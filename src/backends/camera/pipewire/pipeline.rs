// SPDX-License-Identifier: MPL-2.0

//! PipeWire GStreamer pipeline for one capture session
//!
//! `pipewiresrc ! videoconvert ! videoscale ! RGBA ! appsink`. The appsink
//! callback publishes frames straight into the session's frame slots and
//! a bus sync handler turns pipeline errors and EOS into device events.
//! Request parameters go to the device through [`DeviceControls`].

use super::super::types::{CameraDevice, CameraFrame, CaptureRequest, FrameData, SensorRotation};
use super::super::{CameraHandle, DeviceEvent, FrameTarget, SessionCallbacks};
use super::controls::DeviceControls;
use super::enumeration::target_object;
use crate::constants::timing;
use crate::errors::SessionError;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// An open PipeWire camera
pub struct PipeWireCapture {
    id: String,
    rotation: SensorRotation,
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    callbacks: SessionCallbacks,
    controls: DeviceControls,
    /// Last request written to the device
    applied: CaptureRequest,
    /// Set on close; callbacks check it before posting anything
    closed: Arc<AtomicBool>,
}

impl PipeWireCapture {
    /// Build the pipeline and acquire the device
    ///
    /// Blocks until the pipeline reached READY, so it runs on the opener
    /// thread, never on the orchestrator.
    pub fn open(device: &CameraDevice, callbacks: SessionCallbacks) -> Result<Self, SessionError> {
        let open_failed = |reason: String| SessionError::OpenFailed {
            id: device.id.clone(),
            reason,
        };

        gstreamer::init().map_err(|e| open_failed(format!("GStreamer init failed: {}", e)))?;

        let source = match target_object(&device.id) {
            Some(target) => format!("pipewiresrc target-object={} do-timestamp=true", target),
            None => "pipewiresrc do-timestamp=true".to_string(),
        };
        let description = format!(
            "{} ! videoconvert ! videoscale ! video/x-raw,format=RGBA ! \
             appsink name=sink sync=false max-buffers=2 drop=true enable-last-sample=false",
            source
        );
        info!(device = %device.name, pipeline = %description, "Opening PipeWire camera");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| open_failed(format!("Failed to build pipeline: {}", e)))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| open_failed("Camera pipeline is not a Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_failed("Failed to get appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| open_failed("Failed to cast appsink".into()))?;

        let closed = Arc::new(AtomicBool::new(false));
        install_bus_handler(&pipeline, &callbacks, &closed, &device.id);

        pipeline
            .set_state(gstreamer::State::Ready)
            .map_err(|e| open_failed(format!("Failed to acquire camera: {}", e)))?;

        Ok(Self {
            id: device.id.clone(),
            rotation: device.rotation,
            pipeline,
            appsink,
            callbacks,
            controls: DeviceControls::for_device(device),
            applied: CaptureRequest::record(),
            closed,
        })
    }

    /// Write the fields of `request` that changed since the last one
    fn apply_request(&mut self, request: &CaptureRequest) -> Result<bool, SessionError> {
        let supported = self.controls.apply(&self.applied, request)?;
        self.applied = request.clone();
        self.applied.af_trigger = false;
        Ok(supported)
    }

    /// Controls are best effort while (re)starting a stream
    fn apply_initial(&mut self, request: &CaptureRequest) {
        match self.apply_request(request) {
            Ok(true) => {}
            Ok(false) => debug!(id = %self.id, "Some request parameters are not supported"),
            Err(e) => warn!(id = %self.id, error = %e, "Failed to apply request parameters"),
        }
    }

    fn play(&self, configured: DeviceEvent) -> Result<(), SessionError> {
        match self.pipeline.set_state(gstreamer::State::Playing) {
            Ok(_) => {
                self.callbacks.post(configured);
                Ok(())
            }
            Err(e) => {
                let err = SessionError::ConfigureFailed {
                    id: self.id.clone(),
                    reason: format!("Failed to start pipeline: {}", e),
                };
                self.callbacks
                    .post(DeviceEvent::ConfigureFailed(err.clone()));
                Err(err)
            }
        }
    }
}

fn install_bus_handler(
    pipeline: &gstreamer::Pipeline,
    callbacks: &SessionCallbacks,
    closed: &Arc<AtomicBool>,
    id: &str,
) {
    let Some(bus) = pipeline.bus() else {
        warn!(id, "Camera pipeline has no bus");
        return;
    };
    let callbacks = callbacks.clone();
    let closed = Arc::clone(closed);
    let id = id.to_string();

    bus.set_sync_handler(move |_, msg| {
        if closed.load(Ordering::Acquire) {
            return gstreamer::BusSyncReply::Drop;
        }
        match msg.view() {
            gstreamer::MessageView::Error(err) => {
                error!(
                    id = %id,
                    error = %err.error(),
                    debug = ?err.debug(),
                    "Camera pipeline error"
                );
                callbacks.post(DeviceEvent::Error(SessionError::Device {
                    id: id.clone(),
                    reason: err.error().to_string(),
                }));
            }
            gstreamer::MessageView::Eos(_) => {
                info!(id = %id, "Camera stream ended");
                callbacks.post(DeviceEvent::Disconnected);
            }
            _ => {}
        }
        gstreamer::BusSyncReply::Drop
    });
}

/// Turn an appsink sample into a frame without copying the pixels
fn frame_from_sample(
    sample: &gstreamer::Sample,
    rotation: SensorRotation,
) -> Result<CameraFrame, gstreamer::FlowError> {
    let caps = sample.caps().ok_or(gstreamer::FlowError::Error)?;
    let info = VideoInfo::from_caps(caps).map_err(|_| gstreamer::FlowError::Error)?;
    let buffer = sample
        .buffer_owned()
        .ok_or(gstreamer::FlowError::Error)?;
    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
        return Err(gstreamer::FlowError::Error);
    }
    let mapped = buffer
        .into_mapped_buffer_readable()
        .map_err(|_| gstreamer::FlowError::Error)?;

    let mut frame = CameraFrame::rgba(
        info.width(),
        info.height(),
        FrameData::Mapped(Arc::new(mapped)),
    )
    .with_rotation(rotation);
    frame.stride = info.stride()[0] as u32;
    frame.captured_at = Instant::now();
    Ok(frame)
}

impl CameraHandle for PipeWireCapture {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_repeating(
        &mut self,
        target: FrameTarget,
        request: &CaptureRequest,
    ) -> Result<(), SessionError> {
        self.apply_initial(request);
        let rotation = self.rotation;
        let id = self.id.clone();
        let frames = AtomicU64::new(0);

        self.appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let frame_num = frames.fetch_add(1, Ordering::Relaxed);
                    match frame_from_sample(&sample, rotation) {
                        Ok(frame) => {
                            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                                debug!(
                                    id = %id,
                                    frame = frame_num,
                                    width = frame.width,
                                    height = frame.height,
                                    "Camera frames"
                                );
                            }
                            target.publish(frame);
                        }
                        Err(_) => {
                            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                                warn!(
                                    id = %id,
                                    frame = frame_num,
                                    "Skipping unreadable camera frame"
                                );
                            }
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        debug!(id = %self.id, ?request, "Starting repeating capture");
        self.play(DeviceEvent::Configured)
    }

    fn update_request(&mut self, request: &CaptureRequest) -> Result<bool, SessionError> {
        let supported = self.apply_request(request)?;
        debug!(id = %self.id, ?request, supported, "Capture request updated");
        Ok(supported)
    }

    fn capture_single(
        &mut self,
        target: FrameTarget,
        request: &CaptureRequest,
        settle_frames: u32,
    ) -> Result<(), SessionError> {
        self.apply_initial(request);
        let rotation = self.rotation;
        let callbacks = self.callbacks.clone();
        let closed = Arc::clone(&self.closed);
        let id = self.id.clone();
        let seen = AtomicU32::new(0);
        let done = AtomicBool::new(false);

        self.appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    if done.load(Ordering::Acquire) || closed.load(Ordering::Acquire) {
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }
                    // Let exposure and focus settle first
                    if seen.fetch_add(1, Ordering::AcqRel) < settle_frames {
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }
                    done.store(true, Ordering::Release);
                    match frame_from_sample(&sample, rotation) {
                        Ok(frame) => {
                            target.publish(frame);
                            callbacks.post(DeviceEvent::CaptureCompleted);
                        }
                        Err(e) => {
                            callbacks.post(DeviceEvent::CaptureFailed(SessionError::CaptureFailed {
                                id: id.clone(),
                                reason: format!("Unreadable frame: {:?}", e),
                            }));
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        debug!(id = %self.id, settle_frames, "Starting single-shot capture");
        self.play(DeviceEvent::Configured)
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(id = %self.id, "Closing PipeWire camera");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(id = %self.id, ?e, "Failed to stop camera pipeline");
        }
    }
}

impl Drop for PipeWireCapture {
    fn drop(&mut self) {
        self.close();
    }
}
