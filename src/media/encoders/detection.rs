// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection
//!
//! Reports which of the encoders the recorder knows how to drive are
//! actually installed.

use super::video::{EncoderInfo, enumerate_video_encoders};
use gstreamer as gst;
use tracing::{debug, info};

const AUDIO_ENCODERS: [&str; 5] = ["avenc_aac", "fdkaacenc", "voaacenc", "faac", "opusenc"];

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

/// Detect available video encoders, best first
pub fn detect_video_encoders() -> Vec<EncoderInfo> {
    let available = enumerate_video_encoders();
    for info in &available {
        debug!(
            encoder = %info.element_name,
            codec = info.codec.display_name(),
            hardware = info.is_hardware,
            "Video encoder available"
        );
    }
    info!("Detected {} video encoders", available.len());
    available
}

/// Detect available audio encoders in selection order
pub fn detect_audio_encoders() -> Vec<String> {
    let available: Vec<String> = AUDIO_ENCODERS
        .iter()
        .filter(|name| is_element_available(name))
        .map(|name| {
            debug!("Audio encoder available: {}", name);
            name.to_string()
        })
        .collect();
    info!("Detected {} audio encoders", available.len());
    available
}

/// Log all available encoders (for debugging)
pub fn log_available_encoders() {
    info!("=== GStreamer Encoder Detection ===");

    info!("Video encoders:");
    for encoder in detect_video_encoders() {
        info!("  ✓ {}", encoder.display_name);
    }

    info!("Audio encoders:");
    for encoder in detect_audio_encoders() {
        info!("  ✓ {}", encoder);
    }
}
