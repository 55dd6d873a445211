// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// The composite frame is encoded at the output resolution, so the bitrate
/// is picked from the resolution tier of the output, not of either camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given output resolution
    ///
    /// - SD (640x480): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080): Low=4, Medium=8, High=16 Mbps
    /// - 4K (3840x2160): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32, height: u32) -> u32 {
        // Portrait output uses the long edge for tier selection
        self.bitrate_for_tier(get_resolution_tier(width.max(height)))
    }

    pub fn bitrate_for_tier(&self, tier: ResolutionTier) -> u32 {
        match (tier, self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 15_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::FourK, BitratePreset::High) => 50_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: 640x480 and below
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// 4K: 3840x2160 and above
    FourK,
}

/// Get the resolution tier for the long edge of a frame
pub fn get_resolution_tier(long_edge: u32) -> ResolutionTier {
    match long_edge {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Orchestrator timing defaults
pub mod timing {
    use super::Duration;

    /// Delay between the primary camera opening and the secondary open attempt
    pub const SECONDARY_OPEN_DELAY: Duration = Duration::from_millis(300);

    /// Interval between fallback snapshot attempts, measured from completion
    pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(3000);

    /// Delay before the first fallback snapshot
    pub const SNAPSHOT_INITIAL_DELAY: Duration = Duration::from_millis(2000);

    /// Frames discarded before the snapshot frame so AE/AF can settle
    pub const SNAPSHOT_SETTLE_FRAMES: u32 = 3;

    /// A snapshot attempt with no outcome after this long counts as failed
    pub const SNAPSHOT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Sleep of the audio thread while paused
    pub const AUDIO_PAUSED_POLL: Duration = Duration::from_millis(50);

    /// Upper bound for joining a worker thread during teardown
    pub const THREAD_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long the muxer waits for end-of-stream while finalizing
    pub const MUXER_EOS_TIMEOUT_MS: u64 = 5000;

    /// Log frame statistics every N rendered frames
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}

/// Encoder drain budgets
pub mod drain {
    use super::Duration;

    /// Iterations per render tick while running
    pub const RUNNING_ITERATIONS: usize = 10;

    /// Iterations once end-of-stream has been signaled
    pub const END_OF_STREAM_ITERATIONS: usize = 100;

    /// Dequeue timeout once end-of-stream has been signaled
    pub const END_OF_STREAM_TIMEOUT: Duration = Duration::from_millis(10);

    /// Dequeue timeout while running
    pub const RUNNING_TIMEOUT: Duration = Duration::ZERO;
}

/// PiP layout constants
pub mod pip {
    /// Reference width in dp of the shorter output edge
    pub const REFERENCE_DP: f32 = 360.0;

    /// Default inset margin in dp
    pub const DEFAULT_MARGIN_DP: u32 = 12;

    /// Border stroke width in dp
    pub const BORDER_STROKE_DP: f32 = 3.0;

    /// Border colour (white, 80 % alpha)
    pub const BORDER_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 0.8];

    /// Corner radius as a fraction of the PiP extent
    pub const CORNER_RADIUS: f32 = 0.08;

    /// Clear colour of the output canvas
    pub const CLEAR_COLOR: [f64; 4] = [0.0, 0.0, 0.0, 1.0];
}

/// Audio capture defaults
pub mod audio {
    pub const SAMPLE_RATE: u32 = 44_100;
    pub const CHANNELS: u32 = 1;
    pub const BITRATE_BPS: u32 = 128_000;
    /// Bytes read from the capture device per loop iteration
    pub const READ_CHUNK_BYTES: usize = 4096;
}

/// Default key frame interval in seconds
pub const KEYFRAME_INTERVAL_SECS: u32 = 1;

/// Default output file prefix
pub const OUTPUT_PREFIX: &str = "DualCam";
