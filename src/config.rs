// SPDX-License-Identifier: GPL-3.0-only

//! Recorder settings
//!
//! Stored as JSON; every field has a default so older or partial files
//! still load.

use crate::backends::audio::AudioFormat;
use crate::constants::{self, BitratePreset, audio, timing};
use crate::errors::{AppError, AppResult};
use crate::media::encoders::VideoCodec;
use crate::pipelines::dual::{AudioConfig, EncodingConfig, PipConfig, TimingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Microphone settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub enabled: bool,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_bps: u32,
    pub read_chunk_bytes: usize,
    /// PipeWire serial of the microphone, default source when unset
    pub device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: audio::SAMPLE_RATE,
            channels: audio::CHANNELS,
            bitrate_bps: audio::BITRATE_BPS,
            read_chunk_bytes: audio::READ_CHUNK_BYTES,
            device: None,
        }
    }
}

/// Orchestrator delays, in milliseconds on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub secondary_open_delay_ms: u64,
    pub snapshot_interval_ms: u64,
    pub snapshot_initial_delay_ms: u64,
    pub snapshot_settle_frames: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            secondary_open_delay_ms: timing::SECONDARY_OPEN_DELAY.as_millis() as u64,
            snapshot_interval_ms: timing::SNAPSHOT_INTERVAL.as_millis() as u64,
            snapshot_initial_delay_ms: timing::SNAPSHOT_INITIAL_DELAY.as_millis() as u64,
            snapshot_settle_frames: timing::SNAPSHOT_SETTLE_FRAMES,
        }
    }
}

impl TimingSettings {
    pub fn to_timing_config(&self) -> TimingConfig {
        TimingConfig {
            secondary_open_delay: Duration::from_millis(self.secondary_open_delay_ms),
            snapshot_interval: Duration::from_millis(self.snapshot_interval_ms),
            snapshot_initial_delay: Duration::from_millis(self.snapshot_initial_delay_ms),
            snapshot_settle_frames: self.snapshot_settle_frames,
            ..TimingConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub codec: VideoCodec,
    pub bitrate_preset: BitratePreset,
    /// Takes precedence over the preset when set
    pub bitrate_kbps: Option<u32>,
    pub keyframe_interval_secs: u32,
    /// Force a specific encoder element, e.g. `x264enc`
    pub encoder: Option<String>,
    pub audio: AudioSettings,
    /// Playback rotation hint: 0, 90, 180 or 270
    pub orientation_degrees: u32,
    pub pip: PipConfig,
    pub timing: TimingSettings,
    /// MP4 fragment duration, 0 writes a regular MP4
    pub fragment_duration_ms: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 30,
            codec: VideoCodec::default(),
            bitrate_preset: BitratePreset::default(),
            bitrate_kbps: None,
            keyframe_interval_secs: constants::KEYFRAME_INTERVAL_SECS,
            encoder: None,
            audio: AudioSettings::default(),
            orientation_degrees: 0,
            pip: PipConfig::default(),
            timing: TimingSettings::default(),
            fragment_duration_ms: 1000,
        }
    }
}

impl RecorderSettings {
    /// Default settings file, `~/.config/dualcam/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dualcam").join("settings.json"))
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let settings: Self = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("Invalid settings {}: {}", path.display(), e)))?;
        settings.validate()?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> AppResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, text)
            .map_err(|e| AppError::Config(format!("Failed to write {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Saved settings");
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AppError::Config(format!(
                "Output size {}x{} must not be zero",
                self.width, self.height
            )));
        }
        // Chroma subsampling needs even dimensions
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(AppError::Config(format!(
                "Output size {}x{} must be even",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(AppError::Config("Frame rate must not be zero".into()));
        }
        if !matches!(self.orientation_degrees, 0 | 90 | 180 | 270) {
            return Err(AppError::Config(format!(
                "Orientation {} is not one of 0, 90, 180, 270",
                self.orientation_degrees
            )));
        }
        if self.bitrate_kbps == Some(0) {
            return Err(AppError::Config("Bitrate must not be zero".into()));
        }
        Ok(())
    }

    /// Effective video bitrate
    pub fn video_bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
            .unwrap_or_else(|| self.bitrate_preset.bitrate_kbps(self.width, self.height))
    }

    pub fn encoding_config(&self) -> EncodingConfig {
        EncodingConfig {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            codec: self.codec,
            bitrate_kbps: self.video_bitrate_kbps(),
            keyframe_interval_secs: self.keyframe_interval_secs,
            encoder_element: self.encoder.clone(),
            audio: self.audio.enabled.then(|| AudioConfig {
                device: self.audio.device.clone(),
                format: AudioFormat {
                    sample_rate: self.audio.sample_rate,
                    channels: self.audio.channels,
                },
                bitrate_bps: self.audio.bitrate_bps,
                read_chunk_bytes: self.audio.read_chunk_bytes,
            }),
            orientation_degrees: self.orientation_degrees,
            fragment_duration_ms: self.fragment_duration_ms,
        }
    }
}
