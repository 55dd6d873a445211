// SPDX-License-Identifier: MPL-2.0

//! Video encoder selection and the GStreamer video encoder
//!
//! Selection prefers hardware encoders for the requested codec and falls
//! back to software ones. The encoder receives composited RGBA frames via
//! its [`InputSurface`] and hands back access units in `avc`/`hvc1` stream
//! format, ready for MP4.

use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::EncoderError;
use crate::media::codec::{
    DequeueResult, Encoder, InputSurface, RenderedFrame, TrackKind, VideoEncoder,
};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppLeakyType, AppSink, AppSrc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppSinkOutput;

/// Supported video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoCodec {
    /// H.264/AVC (best compatibility)
    #[default]
    H264,
    /// HEVC/H.265 (better compression)
    HEVC,
}

impl VideoCodec {
    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
            VideoCodec::HEVC => "H.265",
        }
    }

    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::HEVC => "h265parse",
        }
    }

    /// Caps forced after the parser so mp4mux gets length-prefixed AUs
    pub fn output_caps(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/x-h264,stream-format=avc,alignment=au",
            VideoCodec::HEVC => "video/x-h265,stream-format=hvc1,alignment=au",
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: String,
    pub display_name: String,
    pub codec: VideoCodec,
    pub is_hardware: bool,
    /// Lower = preferred
    pub priority: u32,
}

const ENCODER_SPECS: [(&str, &str, VideoCodec, bool, u32); 15] = [
    ("vah265enc", "VA-API H.265 (HW)", VideoCodec::HEVC, true, 20),
    ("vaapih265enc", "VA-API H.265 (HW)", VideoCodec::HEVC, true, 21),
    ("nvh265enc", "NVIDIA H.265 (HW)", VideoCodec::HEVC, true, 22),
    ("qsvh265enc", "Intel QSV H.265 (HW)", VideoCodec::HEVC, true, 23),
    ("amfh265enc", "AMD AMF H.265 (HW)", VideoCodec::HEVC, true, 24),
    ("v4l2h265enc", "V4L2 H.265 (HW)", VideoCodec::HEVC, true, 25),
    ("x265enc", "x265 H.265 (SW)", VideoCodec::HEVC, false, 30),
    ("vah264enc", "VA-API H.264 (HW)", VideoCodec::H264, true, 40),
    ("vaapih264enc", "VA-API H.264 (HW)", VideoCodec::H264, true, 41),
    ("nvh264enc", "NVIDIA H.264 (HW)", VideoCodec::H264, true, 42),
    ("qsvh264enc", "Intel QSV H.264 (HW)", VideoCodec::H264, true, 43),
    ("amfh264enc", "AMD AMF H.264 (HW)", VideoCodec::H264, true, 44),
    ("v4l2h264enc", "V4L2 H.264 (HW)", VideoCodec::H264, true, 45),
    ("x264enc", "x264 H.264 (SW)", VideoCodec::H264, false, 50),
    ("openh264enc", "OpenH264 H.264 (SW)", VideoCodec::H264, false, 51),
];

/// Enumerate available video encoders sorted by priority
pub fn enumerate_video_encoders() -> Vec<EncoderInfo> {
    let _ = gst::init();

    let mut available: Vec<EncoderInfo> = ENCODER_SPECS
        .iter()
        .filter(|(element, ..)| gst::ElementFactory::find(element).is_some())
        .map(|(element, display, codec, hw, priority)| EncoderInfo {
            element_name: element.to_string(),
            display_name: display.to_string(),
            codec: *codec,
            is_hardware: *hw,
            priority: *priority,
        })
        .collect();

    available.sort_by_key(|e| e.priority);
    available
}

/// Everything needed to build a video encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub keyframe_interval_secs: u32,
    /// Force a specific element instead of automatic selection
    pub element: Option<String>,
}

impl VideoEncoderSettings {
    /// Key frame distance in frames
    pub fn keyframe_distance(&self) -> u32 {
        (self.framerate * self.keyframe_interval_secs).max(1)
    }
}

/// Set an integer property whatever its exact GType
fn set_numeric(element: &gst::Element, name: &str, value: u32) {
    let Some(pspec) = element.find_property(name) else {
        debug!(property = name, "Encoder has no such property");
        return;
    };
    let ty = pspec.value_type();
    if ty == u32::static_type() {
        element.set_property(name, value);
    } else if ty == i32::static_type() {
        element.set_property(name, value as i32);
    } else if ty == u64::static_type() {
        element.set_property(name, value as u64);
    } else if ty == i64::static_type() {
        element.set_property(name, value as i64);
    } else {
        warn!(property = name, ?ty, "Unexpected property type");
    }
}

/// Set an enum property by nick if the element has it
fn set_enum(element: &gst::Element, name: &str, nick: &str) {
    if element.has_property(name) {
        element.set_property_from_str(name, nick);
    }
}

/// Configure encoder properties by element type
fn configure_video_encoder(
    encoder: &gst::Element,
    encoder_name: &str,
    settings: &VideoEncoderSettings,
) {
    let bitrate = settings.bitrate_kbps;
    let gop = settings.keyframe_distance();

    match encoder_name {
        "x264enc" | "x265enc" => {
            set_enum(encoder, "speed-preset", "veryfast");
            if encoder_name == "x264enc" {
                set_enum(encoder, "tune", "zerolatency");
            }
            set_numeric(encoder, "bitrate", bitrate);
            set_numeric(encoder, "key-int-max", gop);
            debug!(encoder = encoder_name, bitrate, gop, "Configured software encoder");
        }
        "openh264enc" => {
            set_enum(encoder, "rate-control", "bitrate");
            // Bits per second
            set_numeric(encoder, "bitrate", bitrate * 1000);
            set_numeric(encoder, "gop-size", gop);
            set_enum(encoder, "usage-type", "camera");
            debug!(bitrate_bps = bitrate * 1000, gop, "Configured openh264enc");
        }
        "vaapih264enc" | "vaapih265enc" => {
            set_enum(encoder, "rate-control", "cbr");
            set_numeric(encoder, "bitrate", bitrate);
            set_numeric(encoder, "keyframe-period", gop);
            debug!(bitrate, gop, "Configured VA-API (legacy) encoder");
        }
        "vah264enc" | "vah265enc" => {
            set_enum(encoder, "rate-control", "cbr");
            set_numeric(encoder, "bitrate", bitrate);
            set_numeric(encoder, "key-int-max", gop);
            debug!(bitrate, gop, "Configured VA-API encoder");
        }
        "nvh264enc" | "nvh265enc" | "amfh264enc" | "amfh265enc" => {
            set_numeric(encoder, "bitrate", bitrate);
            set_enum(encoder, "rc-mode", "cbr");
            set_enum(encoder, "rate-control", "cbr");
            set_numeric(encoder, "gop-size", gop);
            debug!(encoder = encoder_name, bitrate, gop, "Configured NVIDIA/AMF encoder");
        }
        "qsvh264enc" | "qsvh265enc" => {
            set_numeric(encoder, "bitrate", bitrate);
            set_numeric(encoder, "gop-size", gop);
            debug!(bitrate, gop, "Configured Intel QSV encoder");
        }
        _ => {
            // V4L2 encoders expose few properties
            debug!(encoder = encoder_name, "Using encoder defaults");
        }
    }
}

/// Pick the element to use for `settings`
fn select_element(settings: &VideoEncoderSettings) -> Result<String, EncoderError> {
    if let Some(element) = &settings.element {
        return if gst::ElementFactory::find(element).is_some() {
            Ok(element.clone())
        } else {
            Err(EncoderError::Create(format!("Encoder {} not installed", element)))
        };
    }

    enumerate_video_encoders()
        .into_iter()
        .find(|info| info.codec == settings.codec)
        .map(|info| {
            info!(
                encoder = %info.element_name,
                codec = ?info.codec,
                hardware = info.is_hardware,
                "Selected video encoder"
            );
            info.element_name
        })
        .ok_or_else(|| {
            EncoderError::Create(format!(
                "No {} encoder available. Please install gstreamer1-plugins-ugly (x264enc) \
                 or gstreamer1-plugin-openh264",
                settings.codec.display_name()
            ))
        })
}

/// Frames queued in front of the encoder; older ones are dropped first
const INPUT_QUEUE_FRAMES: u64 = 2;

/// RGBA source of the encoder pipeline
///
/// Bounded and leaky so a slow encoder drops frames instead of growing
/// the queue.
fn frame_source(settings: &VideoEncoderSettings) -> AppSrc {
    AppSrc::builder()
        .name("frames")
        .caps(
            &gst::Caps::builder("video/x-raw")
                .field("format", "RGBA")
                .field("width", settings.width as i32)
                .field("height", settings.height as i32)
                .field("framerate", gst::Fraction::new(settings.framerate as i32, 1))
                .build(),
        )
        .format(gst::Format::Time)
        .is_live(true)
        .do_timestamp(true)
        .max_buffers(INPUT_QUEUE_FRAMES)
        .leaky_type(AppLeakyType::Downstream)
        .build()
}

/// The appsrc end of the encoder pipeline
pub struct GstInputSurface {
    appsrc: AppSrc,
    width: u32,
    height: u32,
    submitted: AtomicU64,
}

impl GstInputSurface {
    fn new(appsrc: AppSrc, width: u32, height: u32) -> Self {
        Self {
            appsrc,
            width,
            height,
            submitted: AtomicU64::new(0),
        }
    }

    /// Frames pushed into this encoder so far
    pub fn frames_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl InputSurface for GstInputSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn submit(&self, frame: RenderedFrame) -> Result<(), EncoderError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EncoderError::Input(format!(
                "Frame size {}x{} doesn't match encoder {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        let expected = (self.width * self.height * 4) as usize;
        if frame.data.len() != expected {
            return Err(EncoderError::Input(format!(
                "Frame data size {} doesn't match expected {}",
                frame.data.len(),
                expected
            )));
        }

        self.appsrc
            .push_buffer(gst::Buffer::from_slice(frame.data))
            .map_err(|e| EncoderError::Input(format!("Failed to push frame: {:?}", e)))?;

        let count = self.submitted.fetch_add(1, Ordering::Relaxed);
        if count % FRAME_LOG_INTERVAL == 0 {
            debug!(frame = count, "Frames submitted to video encoder");
        }
        Ok(())
    }
}

/// `appsrc ! videoconvert ! <encoder> ! <parser> ! appsink`
pub struct GstVideoEncoder {
    name: String,
    pipeline: gst::Pipeline,
    surface: Arc<GstInputSurface>,
    output: AppSinkOutput,
    released: bool,
}

impl GstVideoEncoder {
    pub fn new(settings: &VideoEncoderSettings) -> Result<Self, EncoderError> {
        gst::init().map_err(|e| EncoderError::Create(format!("GStreamer init failed: {}", e)))?;

        let element_name = select_element(settings)?;
        let make = |factory: &str| {
            gst::ElementFactory::make(factory)
                .build()
                .map_err(|e| EncoderError::Create(format!("Failed to create {}: {}", factory, e)))
        };

        let appsrc = frame_source(settings);

        let convert = make("videoconvert")?;
        let encoder = make(&element_name)?;
        configure_video_encoder(&encoder, &element_name, settings);
        let parser = make(settings.codec.parser_name())?;
        let output_caps = settings
            .codec
            .output_caps()
            .parse::<gst::Caps>()
            .map_err(|e| EncoderError::Create(format!("Invalid caps: {}", e)))?;
        let caps_filter = gst::ElementFactory::make("capsfilter")
            .property("caps", &output_caps)
            .build()
            .map_err(|e| EncoderError::Create(format!("Failed to create capsfilter: {}", e)))?;
        let appsink = AppSink::builder().name("encoded").sync(false).build();

        let pipeline = gst::Pipeline::with_name("dualcam-video-encoder");
        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &convert,
                &encoder,
                &parser,
                &caps_filter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| EncoderError::Create(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &convert,
            &encoder,
            &parser,
            &caps_filter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| EncoderError::Create(format!("Failed to link encoder pipeline: {}", e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Create(format!("Failed to start encoder: {}", e)))?;

        info!(
            encoder = %element_name,
            width = settings.width,
            height = settings.height,
            fps = settings.framerate,
            bitrate_kbps = settings.bitrate_kbps,
            "Video encoder ready"
        );

        Ok(Self {
            name: element_name,
            pipeline,
            surface: Arc::new(GstInputSurface::new(appsrc, settings.width, settings.height)),
            output: AppSinkOutput::new(appsink, TrackKind::Video),
            released: false,
        })
    }
}

impl Encoder for GstVideoEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<DequeueResult, EncoderError> {
        if self.released {
            return Err(EncoderError::Released);
        }
        self.output.dequeue(timeout)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), EncoderError> {
        self.surface
            .appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| EncoderError::Input(format!("Failed to send EOS: {:?}", e)))
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| EncoderError::Output(format!("Failed to stop encoder: {}", e)))
    }
}

impl VideoEncoder for GstVideoEncoder {
    fn input_surface(&self) -> Arc<dyn InputSurface> {
        self.surface.clone()
    }
}

impl Drop for GstVideoEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release video encoder on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> VideoEncoderSettings {
        VideoEncoderSettings {
            codec: VideoCodec::H264,
            width: 4,
            height: 2,
            framerate: 30,
            bitrate_kbps: 1000,
            keyframe_interval_secs: 1,
            element: None,
        }
    }

    #[test]
    fn test_frame_source_is_bounded_and_leaky() {
        if gst::init().is_err() || gst::ElementFactory::find("appsrc").is_none() {
            eprintln!("GStreamer app plugin not available, skipping");
            return;
        }
        let appsrc = frame_source(&settings());
        assert_eq!(appsrc.max_buffers(), INPUT_QUEUE_FRAMES);
        assert_eq!(appsrc.leaky_type(), AppLeakyType::Downstream);
    }

    #[test]
    fn test_submit_counts_per_surface() {
        if gst::init().is_err()
            || gst::ElementFactory::find("appsrc").is_none()
            || gst::ElementFactory::find("fakesink").is_none()
        {
            eprintln!("GStreamer plugins not available, skipping");
            return;
        }
        let settings = settings();
        let appsrc = frame_source(&settings);
        let sink = gst::ElementFactory::make("fakesink").build().unwrap();
        let pipeline = gst::Pipeline::new();
        pipeline.add_many([appsrc.upcast_ref(), &sink]).unwrap();
        appsrc.link(&sink).unwrap();
        pipeline.set_state(gst::State::Playing).unwrap();

        let surface = GstInputSurface::new(appsrc, settings.width, settings.height);
        let idle = GstInputSurface::new(frame_source(&settings), settings.width, settings.height);
        for _ in 0..5 {
            surface
                .submit(RenderedFrame {
                    width: 4,
                    height: 2,
                    data: vec![0u8; 32],
                })
                .unwrap();
        }
        assert_eq!(surface.frames_submitted(), 5);
        assert_eq!(idle.frames_submitted(), 0);

        pipeline.set_state(gst::State::Null).unwrap();
    }

    #[test]
    fn test_output_caps_are_mp4_ready() {
        assert!(VideoCodec::H264.output_caps().contains("stream-format=avc"));
        assert!(VideoCodec::HEVC.output_caps().contains("stream-format=hvc1"));
        assert_eq!(VideoCodec::HEVC.parser_name(), "h265parse");
    }

    #[test]
    fn test_keyframe_distance() {
        let settings = VideoEncoderSettings {
            codec: VideoCodec::H264,
            width: 1920,
            height: 1080,
            framerate: 30,
            bitrate_kbps: 8000,
            keyframe_interval_secs: 1,
            element: None,
        };
        assert_eq!(settings.keyframe_distance(), 30);
    }

    #[test]
    fn test_spec_table_is_sorted_per_codec() {
        for codec in [VideoCodec::H264, VideoCodec::HEVC] {
            let priorities: Vec<u32> = ENCODER_SPECS
                .iter()
                .filter(|s| s.2 == codec)
                .map(|s| s.4)
                .collect();
            assert!(priorities.windows(2).all(|w| w[0] < w[1]));
            // Hardware candidates come before software ones
            let first_sw = ENCODER_SPECS.iter().position(|s| s.2 == codec && !s.3);
            let last_hw = ENCODER_SPECS.iter().rposition(|s| s.2 == codec && s.3);
            assert!(last_hw < first_sw);
        }
    }
}
