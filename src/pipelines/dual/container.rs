// SPDX-License-Identifier: GPL-3.0-only

//! Container track lifecycle
//!
//! Wraps a [`Muxer`] with the gating rules: the muxer starts exactly once,
//! only after the video track is registered; samples that arrive before
//! the start are dropped; per-track timestamps never go backwards.

use crate::errors::MuxerError;
use crate::media::codec::{EncodedBuffer, TrackFormat, TrackKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::PipelineStats;
use super::muxer::Muxer;

/// What happened to a sample handed to [`ContainerState::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written with the given timestamp
    Written(i64),
    /// Muxer not started or track not registered
    Dropped,
}

pub struct ContainerState {
    muxer: Box<dyn Muxer>,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    started: bool,
    finished: bool,
    last_video_pts: Option<i64>,
    last_audio_pts: Option<i64>,
    stats: Arc<PipelineStats>,
}

impl ContainerState {
    pub fn new(muxer: Box<dyn Muxer>, stats: Arc<PipelineStats>) -> Self {
        Self {
            muxer,
            video_track: None,
            audio_track: None,
            started: false,
            finished: false,
            last_video_pts: None,
            last_audio_pts: None,
            stats,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Video => self.video_track.is_some(),
            TrackKind::Audio => self.audio_track.is_some(),
        }
    }

    /// Register a track announced by an encoder, then start if possible
    pub fn register_track(&mut self, format: &TrackFormat) -> Result<(), MuxerError> {
        if self.has_track(format.kind) {
            warn!(kind = %format.kind, "Track format changed again, keeping first format");
            return Ok(());
        }

        let index = self.muxer.add_track(format)?;
        info!(kind = %format.kind, index, caps = %format.caps, "Registered container track");
        match format.kind {
            TrackKind::Video => self.video_track = Some(index),
            TrackKind::Audio => self.audio_track = Some(index),
        }

        self.start_if_ready()?;
        Ok(())
    }

    /// Start the muxer once the video track is known
    fn start_if_ready(&mut self) -> Result<bool, MuxerError> {
        if self.started || self.finished || self.video_track.is_none() {
            return Ok(false);
        }
        self.muxer.start()?;
        self.started = true;
        info!(audio = self.audio_track.is_some(), "Muxer started");
        Ok(true)
    }

    /// Write one payload buffer at `pts_us`
    pub fn write(
        &mut self,
        kind: TrackKind,
        buffer: &EncodedBuffer,
        pts_us: i64,
    ) -> Result<WriteOutcome, MuxerError> {
        let (track, last) = match kind {
            TrackKind::Video => (self.video_track, &mut self.last_video_pts),
            TrackKind::Audio => (self.audio_track, &mut self.last_audio_pts),
        };

        let Some(track) = track else {
            return Ok(WriteOutcome::Dropped);
        };
        if !self.started || self.finished {
            return Ok(WriteOutcome::Dropped);
        }

        let pts = match *last {
            Some(prev) if pts_us <= prev => {
                debug!(kind = %kind, pts_us, prev, "Nudging non-increasing timestamp");
                prev + 1
            }
            _ => pts_us,
        };

        self.muxer.write_sample(track, buffer, pts)?;
        *last = Some(pts);
        self.stats.record_sample(kind == TrackKind::Video, pts);
        Ok(WriteOutcome::Written(pts))
    }

    /// Finalize (or discard, if never started) the container
    ///
    /// Returns true when a finalized file was produced. Idempotent.
    pub fn finish(&mut self) -> Result<bool, MuxerError> {
        if self.finished {
            return Ok(false);
        }
        self.finished = true;

        if self.started {
            self.muxer.finish()?;
            info!("Container finalized");
            Ok(true)
        } else {
            warn!("Muxer never started, discarding output");
            self.muxer.discard()?;
            Ok(false)
        }
    }
}

impl Drop for ContainerState {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish() {
                warn!(error = %e, "Failed to finish container on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec::BufferFlags;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    struct RecordingMuxer(Arc<Mutex<Log>>);

    impl Muxer for RecordingMuxer {
        fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
            let mut log = self.0.lock();
            log.calls.push(format!("add:{}", format.kind));
            Ok(log.calls.iter().filter(|c| c.starts_with("add")).count() - 1)
        }
        fn start(&mut self) -> Result<(), MuxerError> {
            self.0.lock().calls.push("start".into());
            Ok(())
        }
        fn write_sample(
            &mut self,
            track: usize,
            _buffer: &EncodedBuffer,
            pts_us: i64,
        ) -> Result<(), MuxerError> {
            self.0.lock().calls.push(format!("write:{}:{}", track, pts_us));
            Ok(())
        }
        fn finish(&mut self) -> Result<(), MuxerError> {
            self.0.lock().calls.push("finish".into());
            Ok(())
        }
        fn discard(&mut self) -> Result<(), MuxerError> {
            self.0.lock().calls.push("discard".into());
            Ok(())
        }
    }

    fn buffer() -> EncodedBuffer {
        EncodedBuffer {
            data: vec![1, 2, 3],
            pts_us: 0,
            flags: BufferFlags::default(),
        }
    }

    fn container() -> (ContainerState, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let state = ContainerState::new(
            Box::new(RecordingMuxer(Arc::clone(&log))),
            Arc::new(PipelineStats::default()),
        );
        (state, log)
    }

    #[test]
    fn test_audio_first_does_not_start() {
        let (mut state, log) = container();
        state.register_track(&TrackFormat::audio("audio/mpeg")).unwrap();
        assert!(!state.is_started());
        assert_eq!(
            state.write(TrackKind::Audio, &buffer(), 10).unwrap(),
            WriteOutcome::Dropped
        );

        state.register_track(&TrackFormat::video("video/x-h264")).unwrap();
        assert!(state.is_started());
        assert_eq!(log.lock().calls, vec!["add:audio", "add:video", "start"]);
    }

    #[test]
    fn test_starts_once_and_nudges_timestamps() {
        let (mut state, log) = container();
        state.register_track(&TrackFormat::video("video/x-h264")).unwrap();
        state.register_track(&TrackFormat::video("video/x-h264")).unwrap();
        state.register_track(&TrackFormat::audio("audio/mpeg")).unwrap();

        assert_eq!(
            state.write(TrackKind::Video, &buffer(), 100).unwrap(),
            WriteOutcome::Written(100)
        );
        assert_eq!(
            state.write(TrackKind::Video, &buffer(), 100).unwrap(),
            WriteOutcome::Written(101)
        );
        assert_eq!(
            state.write(TrackKind::Audio, &buffer(), 50).unwrap(),
            WriteOutcome::Written(50)
        );

        let starts = log.lock().calls.iter().filter(|c| *c == "start").count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_finish_without_start_discards() {
        let (mut state, log) = container();
        assert!(!state.finish().unwrap());
        assert!(!state.finish().unwrap());
        assert_eq!(log.lock().calls, vec!["discard"]);
    }

    #[test]
    fn test_video_only_finalizes() {
        let (mut state, log) = container();
        state.register_track(&TrackFormat::video("video/x-h265")).unwrap();
        state.write(TrackKind::Video, &buffer(), 0).unwrap();
        assert!(state.finish().unwrap());
        drop(state);
        assert_eq!(log.lock().calls.last().map(String::as_str), Some("finish"));
    }
}
