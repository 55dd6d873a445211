// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle events and diagnostic counters reported to the application

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// How the two sources are being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Both cameras stream continuously
    Concurrent,
    /// Primary streams; the inset is refreshed by periodic snapshots
    Fallback,
    /// One physical camera feeds both frame sinks
    SingleSource,
}

/// Where the container is written
#[derive(Debug)]
pub enum OutputSink {
    Path(PathBuf),
    /// Already opened writable file, e.g. from a document picker
    File(std::fs::File),
}

impl OutputSink {
    pub fn describe(&self) -> String {
        match self {
            OutputSink::Path(path) => path.display().to_string(),
            OutputSink::File(_) => "<file handle>".to_string(),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            OutputSink::Path(path) => Some(path),
            OutputSink::File(_) => None,
        }
    }
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Started {
        mode: OperatingMode,
        output: String,
    },
    Stopped {
        output: String,
        stats: StatsSnapshot,
    },
    Paused,
    Resumed,
    SourcesSwapped {
        swapped: bool,
    },
    ConfigUpdated,
    ModeChanged {
        mode: OperatingMode,
    },
    /// Terminal failure; `recording_incomplete` is set when a recording was
    /// in progress and its output is not a clean finalized file
    Error {
        reason: String,
        recording_incomplete: bool,
    },
}

/// Counters updated from the render, audio and orchestrator threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    video_samples: AtomicU64,
    audio_samples: AtomicU64,
    frames_rendered: AtomicU64,
    frames_skipped: AtomicU64,
    snapshot_attempts: AtomicU64,
    snapshot_successes: AtomicU64,
    snapshot_failures: AtomicU64,
    last_video_pts_us: AtomicI64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub video_samples: u64,
    pub audio_samples: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub snapshot_attempts: u64,
    pub snapshot_successes: u64,
    pub snapshot_failures: u64,
    pub last_video_pts_us: i64,
}

impl StatsSnapshot {
    /// Encoded duration as seen by the video track
    pub fn video_duration(&self) -> Duration {
        Duration::from_micros(self.last_video_pts_us.max(0) as u64)
    }
}

impl PipelineStats {
    pub fn record_sample(&self, video: bool, pts_us: i64) {
        if video {
            self.video_samples.fetch_add(1, Ordering::Relaxed);
            self.last_video_pts_us.fetch_max(pts_us, Ordering::Relaxed);
        } else {
            self.audio_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_render(&self, rendered: bool) {
        if rendered {
            self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_snapshot_attempt(&self) {
        self.snapshot_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_result(&self, success: bool) {
        if success {
            self.snapshot_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.video_samples,
            &self.audio_samples,
            &self.frames_rendered,
            &self.frames_skipped,
            &self.snapshot_attempts,
            &self.snapshot_successes,
            &self.snapshot_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_video_pts_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_samples: self.video_samples.load(Ordering::Relaxed),
            audio_samples: self.audio_samples.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            snapshot_attempts: self.snapshot_attempts.load(Ordering::Relaxed),
            snapshot_successes: self.snapshot_successes.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            last_video_pts_us: self.last_video_pts_us.load(Ordering::Relaxed),
        }
    }
}
