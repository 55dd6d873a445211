// SPDX-License-Identifier: GPL-3.0-only

//! Encoding and muxing pipeline
//!
//! Two worker threads share one [`PipelineClock`] and one container:
//!
//! - render: fixed-cadence compositor passes into the video encoder, then a
//!   bounded drain with clock timestamps
//! - audio: microphone reads fed to the audio encoder with clock
//!   timestamps, drained on every iteration
//!
//! Teardown order is audio thread, render thread (video encoder, then GPU
//! context), then the container.

use crate::backends::audio::{AudioCapture, AudioFormat};
use crate::backends::camera::FrameSlot;
use crate::constants::timing;
use crate::errors::{CompositorError, PipelineError};
use crate::media::codec::{AudioEncoder, Encoder, TrackKind, VideoEncoder};
use crate::media::encoders::{VideoCodec, VideoEncoderSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use super::backend::MediaBackend;
use super::clock::PipelineClock;
use super::compositor::{Compositor, CompositorControls};
use super::container::ContainerState;
use super::drain::{PtsSource, drain_encoder};
use super::events::{OutputSink, PipelineStats};
use super::frame_loop::{FramePacer, LoopAction, WorkerLoop};
use super::muxer::MuxerOptions;

/// Audio track parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// PipeWire serial of the microphone, `None` for the default source
    pub device: Option<String>,
    pub format: AudioFormat,
    pub bitrate_bps: u32,
    pub read_chunk_bytes: usize,
}

/// Everything the pipeline needs to set itself up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub codec: VideoCodec,
    pub bitrate_kbps: u32,
    pub keyframe_interval_secs: u32,
    /// Force a specific encoder element
    pub encoder_element: Option<String>,
    /// `None` records video only
    pub audio: Option<AudioConfig>,
    pub orientation_degrees: u32,
    pub fragment_duration_ms: u32,
}

impl EncodingConfig {
    pub fn video_settings(&self) -> VideoEncoderSettings {
        VideoEncoderSettings {
            codec: self.codec,
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            bitrate_kbps: self.bitrate_kbps,
            keyframe_interval_secs: self.keyframe_interval_secs,
            element: self.encoder_element.clone(),
        }
    }
}

/// Called from a worker thread when the pipeline cannot continue
pub type FatalHandler = Arc<dyn Fn(PipelineError) + Send + Sync>;

/// Outcome of [`EncodingPipeline::stop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// A finalized container was written
    pub finalized: bool,
    /// Teardown steps that failed (already logged)
    pub errors: Vec<String>,
}

struct RenderState {
    compositor: Compositor,
    encoder: Box<dyn VideoEncoder>,
    pacer: FramePacer,
    clock: Arc<PipelineClock>,
    container: Arc<Mutex<ContainerState>>,
    stats: Arc<PipelineStats>,
    on_fatal: FatalHandler,
    render_errors: u64,
}

struct AudioState {
    capture: Box<dyn AudioCapture>,
    encoder: Box<dyn AudioEncoder>,
    buffer: Vec<u8>,
    capture_paused: bool,
    paused: Arc<AtomicBool>,
    clock: Arc<PipelineClock>,
    container: Arc<Mutex<ContainerState>>,
    on_fatal: FatalHandler,
}

pub struct EncodingPipeline {
    clock: Arc<PipelineClock>,
    container: Arc<Mutex<ContainerState>>,
    stats: Arc<PipelineStats>,
    render: Option<WorkerLoop<Vec<String>>>,
    audio: Option<WorkerLoop<Vec<String>>>,
    pending_audio: Option<AudioState>,
    audio_paused: Arc<AtomicBool>,
    output: String,
    stopped: bool,
}

impl EncodingPipeline {
    /// Create the container, the encoders and the render thread
    ///
    /// The render thread creates and owns the compositing context; its
    /// initialization error, if any, is returned here.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        config: &EncodingConfig,
        backend: Arc<dyn MediaBackend>,
        sink: OutputSink,
        watermark: Option<String>,
        slots: [Arc<FrameSlot>; 2],
        controls: CompositorControls,
        stats: Arc<PipelineStats>,
        on_fatal: FatalHandler,
    ) -> Result<Self, PipelineError> {
        let output = sink.describe();
        info!(
            output = %output,
            width = config.width,
            height = config.height,
            fps = config.framerate,
            codec = config.codec.display_name(),
            bitrate_kbps = config.bitrate_kbps,
            audio = config.audio.is_some(),
            "Preparing encoding pipeline"
        );

        let clock = Arc::new(PipelineClock::new());
        let audio_paused = Arc::new(AtomicBool::new(false));

        // A missing microphone degrades to a video-only recording
        let audio_parts = match &config.audio {
            Some(audio) => match Self::create_audio(backend.as_ref(), audio) {
                Ok(parts) => Some(parts),
                Err(e) => {
                    warn!(error = %e, "Audio unavailable, recording video only");
                    None
                }
            },
            None => None,
        };

        let muxer = backend.create_muxer(
            sink,
            &MuxerOptions {
                with_audio: audio_parts.is_some(),
                orientation_degrees: config.orientation_degrees,
                watermark,
                fragment_duration_ms: config.fragment_duration_ms,
            },
        )?;
        let container = Arc::new(Mutex::new(ContainerState::new(muxer, Arc::clone(&stats))));

        let encoder = backend.create_video_encoder(&config.video_settings())?;
        let surface = encoder.input_surface();

        let render = {
            let clock = Arc::clone(&clock);
            let container = Arc::clone(&container);
            let stats = Arc::clone(&stats);
            let on_fatal = Arc::clone(&on_fatal);
            let backend = Arc::clone(&backend);
            let (width, height, framerate) = (config.width, config.height, config.framerate);

            WorkerLoop::spawn(
                "render",
                move || {
                    let ctx = backend.create_compositing_context(width, height)?;
                    let compositor = Compositor::new(ctx, surface, slots, controls)?;
                    Ok(RenderState {
                        compositor,
                        encoder,
                        pacer: FramePacer::new(framerate),
                        clock,
                        container,
                        stats,
                        on_fatal,
                        render_errors: 0,
                    })
                },
                render_step,
                render_finish,
            )?
        };

        let pending_audio = audio_parts.map(|(capture, encoder)| AudioState {
            buffer: vec![0u8; config.audio.as_ref().map_or(4096, |a| a.read_chunk_bytes.max(2))],
            capture,
            encoder,
            capture_paused: true,
            paused: Arc::clone(&audio_paused),
            clock: Arc::clone(&clock),
            container: Arc::clone(&container),
            on_fatal,
        });

        Ok(Self {
            clock,
            container,
            stats,
            render: Some(render),
            audio: None,
            pending_audio,
            audio_paused,
            output,
            stopped: false,
        })
    }

    fn create_audio(
        backend: &dyn MediaBackend,
        config: &AudioConfig,
    ) -> Result<(Box<dyn AudioCapture>, Box<dyn AudioEncoder>), PipelineError> {
        let capture = backend.create_audio_capture(config.device.as_deref(), config.format)?;
        let encoder = backend.create_audio_encoder(config.format, config.bitrate_bps)?;
        Ok((capture, encoder))
    }

    /// Start the shared clock and the audio thread
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.stopped {
            return Err(PipelineError::Thread("Pipeline already stopped".into()));
        }
        if self.clock.is_running() || self.clock.is_paused() {
            debug!("Encoding pipeline already started");
            return Ok(());
        }

        self.stats.reset();
        self.clock.start();

        if let Some(state) = self.pending_audio.take() {
            // The capture itself starts on the first step
            let audio = WorkerLoop::spawn(
                "audio",
                move || Ok(state),
                audio_step,
                audio_finish,
            )?;
            self.audio = Some(audio);
        }

        info!(output = %self.output, audio = self.audio.is_some(), "Encoding started");
        Ok(())
    }

    /// Freeze the clock and stop feeding audio
    pub fn pause(&self) -> bool {
        if !self.clock.pause() {
            return false;
        }
        self.audio_paused.store(true, Ordering::Release);
        debug!("Encoding paused");
        true
    }

    pub fn resume(&self) -> bool {
        if !self.clock.resume() {
            return false;
        }
        self.audio_paused.store(false, Ordering::Release);
        debug!(paused_total_ms = self.clock.total_paused().as_millis() as u64, "Encoding resumed");
        true
    }

    pub fn clock(&self) -> &Arc<PipelineClock> {
        &self.clock
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Tear everything down; a second call is a no-op
    ///
    /// Every step runs even if an earlier one failed.
    pub fn stop(&mut self) -> StopReport {
        if self.stopped {
            return StopReport::default();
        }
        self.stopped = true;
        info!(output = %self.output, "Stopping encoding pipeline");

        let mut report = StopReport::default();

        if let Some(mut audio) = self.audio.take() {
            match audio.stop() {
                Some(errors) => report.errors.extend(errors),
                None => report.errors.push("Audio thread did not finish".into()),
            }
        }
        // Audio that never started still holds a device
        if let Some(mut state) = self.pending_audio.take() {
            if let Err(e) = state.encoder.release() {
                warn!(error = %e, "Failed to release unused audio encoder");
            }
            state.capture.release();
        }

        if let Some(mut render) = self.render.take() {
            match render.stop() {
                Some(errors) => report.errors.extend(errors),
                None => report.errors.push("Render thread did not finish".into()),
            }
        }

        match self.container.lock().finish() {
            Ok(finalized) => report.finalized = finalized,
            Err(e) => {
                warn!(error = %e, "Failed to finalize container");
                report.errors.push(e.to_string());
            }
        }

        let stats = self.stats.snapshot();
        info!(
            finalized = report.finalized,
            video_samples = stats.video_samples,
            audio_samples = stats.audio_samples,
            duration_ms = stats.video_duration().as_millis() as u64,
            "Encoding pipeline stopped"
        );
        report
    }
}

impl Drop for EncodingPipeline {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("EncodingPipeline dropped without stop");
            self.stop();
        }
    }
}

fn render_step(state: &mut RenderState) -> LoopAction {
    state.pacer.wait();

    if !state.clock.is_running() {
        return LoopAction::Continue;
    }

    match state.compositor.render_frame() {
        Ok(rendered) => {
            state.stats.record_render(rendered);
            if rendered {
                let frames = state.stats.snapshot().frames_rendered;
                if frames % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(frames, "Composited frames");
                }
            }
        }
        Err(CompositorError::Released) => return LoopAction::Stop,
        Err(e) => {
            // Transient: skip this frame
            state.render_errors += 1;
            if state.render_errors == 1 || state.render_errors % timing::FRAME_LOG_INTERVAL == 0 {
                warn!(error = %e, count = state.render_errors, "Render pass failed");
            }
            state.stats.record_render(false);
        }
    }

    if let Err(e) = drain_encoder(
        state.encoder.as_mut(),
        TrackKind::Video,
        &state.container,
        PtsSource::Clock(&state.clock),
        false,
    ) {
        error!(error = %e, "Video drain failed");
        (state.on_fatal)(e);
        return LoopAction::Stop;
    }

    LoopAction::Continue
}

fn render_finish(mut state: RenderState) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(e) = state.encoder.signal_end_of_stream() {
        warn!(error = %e, "Failed to signal video end of stream");
        errors.push(e.to_string());
    } else {
        match drain_encoder(
            state.encoder.as_mut(),
            TrackKind::Video,
            &state.container,
            PtsSource::Clock(&state.clock),
            true,
        ) {
            Ok(outcome) if !outcome.end_of_stream => {
                warn!("Video encoder did not reach end of stream within the drain budget");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Final video drain failed");
                errors.push(e.to_string());
            }
        }
    }

    if let Err(e) = state.encoder.release() {
        warn!(error = %e, "Failed to release video encoder");
        errors.push(e.to_string());
    }

    state.compositor.release();
    errors
}

fn audio_step(state: &mut AudioState) -> LoopAction {
    if state.paused.load(Ordering::Acquire) {
        if !state.capture_paused {
            if let Err(e) = state.capture.pause() {
                warn!(error = %e, "Failed to pause audio capture");
            }
            state.capture_paused = true;
        }
        std::thread::sleep(timing::AUDIO_PAUSED_POLL);
        return LoopAction::Continue;
    }

    if state.capture_paused {
        if let Err(e) = state.capture.start() {
            error!(error = %e, "Failed to start audio capture");
            (state.on_fatal)(e);
            return LoopAction::Stop;
        }
        state.capture_paused = false;
    }

    match state.capture.read(&mut state.buffer) {
        Ok(0) => {}
        Ok(n) => match state.clock.elapsed_us() {
            Some(pts_us) => {
                if let Err(e) = state.encoder.queue_input(&state.buffer[..n], pts_us) {
                    warn!(error = %e, "Failed to queue audio input");
                }
            }
            None => debug!(bytes = n, "Dropping audio read while clock is not running"),
        },
        Err(e) => {
            error!(error = %e, "Audio capture failed");
            (state.on_fatal)(e);
            return LoopAction::Stop;
        }
    }

    if let Err(e) = drain_encoder(
        state.encoder.as_mut(),
        TrackKind::Audio,
        &state.container,
        PtsSource::Encoder,
        false,
    ) {
        error!(error = %e, "Audio drain failed");
        (state.on_fatal)(e);
        return LoopAction::Stop;
    }

    LoopAction::Continue
}

fn audio_finish(mut state: AudioState) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(e) = state.encoder.signal_end_of_stream() {
        warn!(error = %e, "Failed to signal audio end of stream");
        errors.push(e.to_string());
    } else {
        match drain_encoder(
            state.encoder.as_mut(),
            TrackKind::Audio,
            &state.container,
            PtsSource::Encoder,
            true,
        ) {
            Ok(outcome) if !outcome.end_of_stream => {
                warn!("Audio encoder did not reach end of stream within the drain budget");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Final audio drain failed");
                errors.push(e.to_string());
            }
        }
    }

    if let Err(e) = state.encoder.release() {
        warn!(error = %e, "Failed to release audio encoder");
        errors.push(e.to_string());
    }
    state.capture.release();
    errors
}
