// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use crate::pipelines::dual::layout::CameraFacing;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Sensor rotation in degrees (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl SensorRotation {
    /// Parse rotation from a degree value, anything unknown is `None`
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }
}

impl fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// A camera device as seen by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Provider specific identifier (PipeWire: `pipewire-serial-<n>`)
    pub id: String,
    /// Human readable name
    pub name: String,
    pub facing: CameraFacing,
    pub rotation: SensorRotation,
    /// V4L2 node behind the device, used for runtime controls
    pub v4l2_path: Option<String>,
}

/// Pixel payload of a frame
#[derive(Clone)]
pub enum FrameData {
    /// Owned copy of the pixels
    Copied(Arc<[u8]>),
    /// Zero-copy view of a mapped GStreamer buffer
    Mapped(Arc<gstreamer::buffer::MappedBuffer<gstreamer::buffer::Readable>>),
}

impl FrameData {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data,
            FrameData::Mapped(map) => map.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for FrameData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameData::Copied(d) => write!(f, "Copied({} bytes)", d.len()),
            FrameData::Mapped(m) => write!(f, "Mapped({} bytes)", m.len()),
        }
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data))
    }
}

/// Column-major identity transform
pub const IDENTITY_TRANSFORM: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// One RGBA frame delivered by a capture source
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub data: FrameData,
    /// Texture coordinate transform (column-major 4x4)
    pub transform: [f32; 16],
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Tightly packed RGBA frame with an identity transform
    pub fn rgba(width: u32, height: u32, data: impl Into<FrameData>) -> Self {
        Self {
            width,
            height,
            stride: width * 4,
            data: data.into(),
            transform: IDENTITY_TRANSFORM,
            captured_at: Instant::now(),
        }
    }

    /// Texture transform for a sensor mounted with `rotation`
    pub fn with_rotation(mut self, rotation: SensorRotation) -> Self {
        self.transform = rotation_transform(rotation);
        self
    }
}

/// Texture-space rotation about the centre (0.5, 0.5)
pub fn rotation_transform(rotation: SensorRotation) -> [f32; 16] {
    let (cos, sin) = match rotation {
        SensorRotation::None => return IDENTITY_TRANSFORM,
        SensorRotation::Rotate90 => (0.0, 1.0),
        SensorRotation::Rotate180 => (-1.0, 0.0),
        SensorRotation::Rotate270 => (0.0, -1.0),
    };
    // translate(0.5) * rotate * translate(-0.5)
    let tx = 0.5 - 0.5 * cos + 0.5 * sin;
    let ty = 0.5 - 0.5 * sin - 0.5 * cos;
    [
        cos, sin, 0.0, 0.0, //
        -sin, cos, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        tx, ty, 0.0, 1.0,
    ]
}

/// Capture request template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestTemplate {
    /// Continuous streaming for recording
    #[default]
    Record,
    /// One settled frame for a fallback snapshot
    StillCapture,
}

/// Autofocus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfMode {
    #[default]
    ContinuousVideo,
    ContinuousPicture,
    Auto,
    Off,
}

/// Parameters sent with every repeating or single-shot capture request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub af_mode: AfMode,
    /// One-shot autofocus trigger, cleared after it is sent
    pub af_trigger: bool,
    pub auto_exposure: bool,
    /// Exposure bias in 1/1000 EV
    pub exposure_compensation: i32,
    /// Magnification, 1.0 and up
    pub zoom_ratio: f32,
    pub torch: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self::record()
    }
}

impl CaptureRequest {
    pub fn record() -> Self {
        Self {
            template: RequestTemplate::Record,
            af_mode: AfMode::ContinuousVideo,
            af_trigger: false,
            auto_exposure: true,
            exposure_compensation: 0,
            zoom_ratio: 1.0,
            torch: false,
        }
    }

    pub fn still_capture() -> Self {
        Self {
            template: RequestTemplate::StillCapture,
            af_mode: AfMode::ContinuousPicture,
            af_trigger: true,
            ..Self::record()
        }
    }
}

/// Runtime camera controls forwarded to the primary session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraControl {
    Torch(bool),
    Zoom(f32),
    ExposureCompensation(i32),
    AfMode(AfMode),
    AfTrigger,
}

impl CameraControl {
    /// Apply this control to a request
    pub fn apply(self, request: &mut CaptureRequest) {
        match self {
            CameraControl::Torch(on) => request.torch = on,
            CameraControl::Zoom(ratio) => request.zoom_ratio = ratio.max(1.0),
            CameraControl::ExposureCompensation(ev) => request.exposure_compensation = ev,
            CameraControl::AfMode(mode) => request.af_mode = mode,
            CameraControl::AfTrigger => request.af_trigger = true,
        }
    }
}

/// Whether two devices can stream at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencySupport {
    /// The platform confirmed the pair
    Supported,
    /// Unknown, the open attempt decides
    Unknown,
    /// Only one device can stream at a time
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[f32; 16], u: f32, v: f32) -> (f32, f32) {
        (m[0] * u + m[4] * v + m[12], m[1] * u + m[5] * v + m[13])
    }

    #[test]
    fn test_rotation_keeps_centre() {
        for degrees in [0, 90, 180, 270] {
            let m = rotation_transform(SensorRotation::from_degrees(degrees));
            let (u, v) = apply(&m, 0.5, 0.5);
            assert!((u - 0.5).abs() < 1e-6 && (v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rotate_180_flips_corner() {
        let m = rotation_transform(SensorRotation::Rotate180);
        let (u, v) = apply(&m, 0.0, 0.0);
        assert!((u - 1.0).abs() < 1e-6 && (v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_controls_update_request() {
        let mut request = CaptureRequest::record();
        CameraControl::Torch(true).apply(&mut request);
        CameraControl::Zoom(0.5).apply(&mut request);
        CameraControl::ExposureCompensation(-2).apply(&mut request);
        assert!(request.torch);
        assert_eq!(request.zoom_ratio, 1.0);
        assert_eq!(request.exposure_compensation, -2);
    }

    #[test]
    fn test_still_capture_template() {
        let request = CaptureRequest::still_capture();
        assert_eq!(request.template, RequestTemplate::StillCapture);
        assert!(request.af_trigger);
        assert!(request.auto_exposure);
    }
}
