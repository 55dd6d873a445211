// SPDX-License-Identifier: GPL-3.0-only

//! In-memory cameras, encoders, muxer and compositing context
//!
//! Every fake appends to a shared [`CallLog`] so tests can check what was
//! released and in which order.

#![allow(dead_code)]

use dualcam::backends::audio::{AudioCapture, AudioFormat};
use dualcam::backends::camera::{
    CameraDevice, CameraFrame, CameraHandle, CameraProvider, CaptureRequest, ConcurrencySupport,
    DeviceEvent, FrameTarget, SensorRotation, SessionCallbacks,
};
use dualcam::errors::{CompositorError, EncoderError, MuxerError, PipelineError, SessionError};
use dualcam::media::codec::{
    AudioEncoder, BufferFlags, DequeueResult, EncodedBuffer, Encoder, InputSurface,
    RenderedFrame, TrackFormat, VideoEncoder,
};
use dualcam::media::encoders::{VideoCodec, VideoEncoderSettings};
use dualcam::pipelines::dual::compositor::{DrawCommand, SinkId};
use dualcam::pipelines::dual::{
    AudioConfig, CameraFacing, CompositingContext, EncodingConfig, LifecycleEvent, MediaBackend,
    Muxer, MuxerOptions, OutputSink, TimingConfig,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Position of the first entry equal to `call`
pub fn position(log: &CallLog, call: &str) -> Option<usize> {
    log.lock().iter().position(|c| c == call)
}

/// Position of the last entry starting with `prefix`
pub fn last_position(log: &CallLog, prefix: &str) -> Option<usize> {
    log.lock().iter().rposition(|c| c.starts_with(prefix))
}

pub fn count(log: &CallLog, prefix: &str) -> usize {
    log.lock().iter().filter(|c| c.starts_with(prefix)).count()
}

pub fn device(id: &str, facing: CameraFacing) -> CameraDevice {
    CameraDevice {
        id: id.into(),
        name: format!("Camera {}", id),
        facing,
        rotation: SensorRotation::None,
        v4l2_path: None,
    }
}

pub fn front_and_back() -> Vec<CameraDevice> {
    vec![
        device("back", CameraFacing::Back),
        device("front", CameraFacing::Front),
    ]
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        secondary_open_delay: Duration::from_millis(10),
        snapshot_interval: Duration::from_millis(30),
        snapshot_initial_delay: Duration::from_millis(20),
        snapshot_settle_frames: 0,
        snapshot_attempt_timeout: Duration::from_secs(1),
    }
}

pub fn encoding_config(with_audio: bool) -> EncodingConfig {
    EncodingConfig {
        width: 64,
        height: 36,
        framerate: 100,
        codec: VideoCodec::H264,
        bitrate_kbps: 1_000,
        keyframe_interval_secs: 1,
        encoder_element: None,
        audio: with_audio.then(|| AudioConfig {
            device: None,
            format: AudioFormat {
                sample_rate: 48_000,
                channels: 1,
            },
            bitrate_bps: 64_000,
            read_chunk_bytes: 256,
        }),
        orientation_degrees: 0,
        fragment_duration_ms: 1000,
    }
}

pub fn output_sink() -> OutputSink {
    OutputSink::Path(std::env::temp_dir().join("dualcam-test.mp4"))
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Wait for the first event matching `pred`, discarding others
pub fn wait_for_event(
    rx: &mut UnboundedReceiver<LifecycleEvent>,
    timeout: Duration,
    pred: impl Fn(&LifecycleEvent) -> bool,
) -> Option<LifecycleEvent> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        while let Ok(event) = rx.try_recv() {
            if pred(&event) {
                return Some(event);
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

/// Everything currently queued
pub fn drain_events(rx: &mut UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// Cameras

fn test_frame() -> CameraFrame {
    CameraFrame::rgba(2, 2, vec![0u8; 16])
}

struct FakeHandle {
    id: String,
    callbacks: SessionCallbacks,
    fail_streaming: bool,
    has_controls: bool,
    fail_controls: bool,
    streaming: Arc<AtomicBool>,
    closed: bool,
    log: CallLog,
}

impl CameraHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_repeating(
        &mut self,
        target: FrameTarget,
        _request: &CaptureRequest,
    ) -> Result<(), SessionError> {
        self.log.lock().push(format!("camera:stream:{}", self.id));
        if self.fail_streaming {
            self.callbacks.post(DeviceEvent::ConfigureFailed(SessionError::ConfigureFailed {
                id: self.id.clone(),
                reason: "stream combination not supported".into(),
            }));
            return Ok(());
        }

        self.streaming.store(true, Ordering::SeqCst);
        let streaming = Arc::clone(&self.streaming);
        std::thread::spawn(move || {
            while streaming.load(Ordering::SeqCst) {
                target.publish(test_frame());
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        self.callbacks.post(DeviceEvent::Configured);
        Ok(())
    }

    fn update_request(&mut self, request: &CaptureRequest) -> Result<bool, SessionError> {
        if self.fail_controls {
            return Err(SessionError::Control {
                id: self.id.clone(),
                reason: "EBUSY".into(),
            });
        }
        self.log
            .lock()
            .push(format!("camera:update:{}:torch={}", self.id, request.torch));
        Ok(self.has_controls)
    }

    fn capture_single(
        &mut self,
        target: FrameTarget,
        _request: &CaptureRequest,
        _settle_frames: u32,
    ) -> Result<(), SessionError> {
        self.log.lock().push(format!("camera:capture:{}", self.id));
        target.publish(test_frame());
        self.callbacks.post(DeviceEvent::CaptureCompleted);
        Ok(())
    }

    fn close(&mut self) {
        self.streaming.store(false, Ordering::SeqCst);
        if self.closed {
            self.log.lock().push(format!("camera:double-close:{}", self.id));
            return;
        }
        self.closed = true;
        self.log.lock().push(format!("camera:close:{}", self.id));
    }
}

/// Scriptable camera provider
pub struct FakeProvider {
    devices: Vec<CameraDevice>,
    concurrency: ConcurrencySupport,
    fail_open: HashSet<String>,
    fail_streaming: HashSet<String>,
    no_controls: HashSet<String>,
    fail_controls: HashSet<String>,
    latest: Mutex<HashMap<String, SessionCallbacks>>,
    log: CallLog,
}

impl FakeProvider {
    pub fn new(devices: Vec<CameraDevice>, log: CallLog) -> Self {
        Self {
            devices,
            concurrency: ConcurrencySupport::Unknown,
            fail_open: HashSet::new(),
            fail_streaming: HashSet::new(),
            no_controls: HashSet::new(),
            fail_controls: HashSet::new(),
            latest: Mutex::new(HashMap::new()),
            log,
        }
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencySupport) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Every open of `id` reports an error
    pub fn failing_open(mut self, id: &str) -> Self {
        self.fail_open.insert(id.into());
        self
    }

    /// `id` opens and takes single captures but cannot stream
    pub fn failing_stream(mut self, id: &str) -> Self {
        self.fail_streaming.insert(id.into());
        self
    }

    /// `id` has no runtime controls
    pub fn without_controls(mut self, id: &str) -> Self {
        self.no_controls.insert(id.into());
        self
    }

    /// Every control write on `id` fails
    pub fn failing_controls(mut self, id: &str) -> Self {
        self.fail_controls.insert(id.into());
        self
    }

    /// Report a disconnect on the most recent session of `id`
    pub fn disconnect(&self, id: &str) {
        let callbacks = self.latest.lock().get(id).cloned();
        if let Some(callbacks) = callbacks {
            callbacks.post(DeviceEvent::Disconnected);
        }
    }
}

impl CameraProvider for FakeProvider {
    fn enumerate(&self) -> Vec<CameraDevice> {
        self.devices.clone()
    }

    fn concurrency(&self, _a: &CameraDevice, _b: &CameraDevice) -> ConcurrencySupport {
        self.concurrency
    }

    fn open(&self, device: &CameraDevice, callbacks: SessionCallbacks) -> Result<(), SessionError> {
        self.log.lock().push(format!("camera:open:{}", device.id));
        self.latest
            .lock()
            .insert(device.id.clone(), callbacks.clone());

        if self.fail_open.contains(&device.id) {
            callbacks.post(DeviceEvent::Error(SessionError::Device {
                id: device.id.clone(),
                reason: "busy".into(),
            }));
            return Ok(());
        }

        let handle = FakeHandle {
            id: device.id.clone(),
            callbacks: callbacks.clone(),
            fail_streaming: self.fail_streaming.contains(&device.id),
            has_controls: !self.no_controls.contains(&device.id),
            fail_controls: self.fail_controls.contains(&device.id),
            streaming: Arc::new(AtomicBool::new(false)),
            closed: false,
            log: Arc::clone(&self.log),
        };
        callbacks.post(DeviceEvent::Opened(Box::new(handle)));
        Ok(())
    }
}

// Encoders

struct FakeSurface {
    width: u32,
    height: u32,
    frames: AtomicU64,
}

impl InputSurface for FakeSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn submit(&self, _frame: RenderedFrame) -> Result<(), EncoderError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn payload(pts_us: i64, key_frame: bool) -> DequeueResult {
    DequeueResult::Buffer(EncodedBuffer {
        data: vec![0, 0, 0, 1, 0x65],
        pts_us,
        flags: BufferFlags {
            key_frame,
            ..BufferFlags::default()
        },
    })
}

fn end_of_stream() -> DequeueResult {
    DequeueResult::Buffer(EncodedBuffer {
        data: Vec::new(),
        pts_us: 0,
        flags: BufferFlags {
            end_of_stream: true,
            ..BufferFlags::default()
        },
    })
}

struct FakeVideoEncoder {
    surface: Arc<FakeSurface>,
    announced: bool,
    eos_signalled: bool,
    eos_sent: bool,
    released: bool,
    log: CallLog,
}

impl Encoder for FakeVideoEncoder {
    fn name(&self) -> &str {
        "fake-video"
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<DequeueResult, EncoderError> {
        if self.released {
            return Err(EncoderError::Released);
        }
        if !self.announced && self.surface.frames.load(Ordering::SeqCst) > 0 {
            self.announced = true;
            return Ok(DequeueResult::FormatChanged(TrackFormat::video("video/x-h264")));
        }
        let took = self
            .surface
            .frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Ok(payload(0, true));
        }
        if self.eos_signalled && !self.eos_sent {
            self.eos_sent = true;
            return Ok(end_of_stream());
        }
        Ok(DequeueResult::TryAgainLater)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), EncoderError> {
        self.eos_signalled = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        if !self.released {
            self.released = true;
            self.log.lock().push("video:release".into());
        }
        Ok(())
    }
}

impl VideoEncoder for FakeVideoEncoder {
    fn input_surface(&self) -> Arc<dyn InputSurface> {
        Arc::clone(&self.surface) as Arc<dyn InputSurface>
    }
}

struct FakeAudioEncoder {
    queued: VecDeque<i64>,
    announced: bool,
    eos_signalled: bool,
    eos_sent: bool,
    released: bool,
    log: CallLog,
}

impl Encoder for FakeAudioEncoder {
    fn name(&self) -> &str {
        "fake-audio"
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<DequeueResult, EncoderError> {
        if !self.announced {
            self.announced = true;
            return Ok(DequeueResult::FormatChanged(TrackFormat::audio(
                "audio/mpeg,mpegversion=4",
            )));
        }
        if let Some(pts) = self.queued.pop_front() {
            return Ok(payload(pts, false));
        }
        if self.eos_signalled && !self.eos_sent {
            self.eos_sent = true;
            return Ok(end_of_stream());
        }
        Ok(DequeueResult::TryAgainLater)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), EncoderError> {
        self.eos_signalled = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        if !self.released {
            self.released = true;
            self.log.lock().push("audio:release".into());
        }
        Ok(())
    }
}

impl AudioEncoder for FakeAudioEncoder {
    fn queue_input(&mut self, _pcm: &[u8], pts_us: i64) -> Result<(), EncoderError> {
        self.queued.push_back(pts_us);
        Ok(())
    }
}

struct FakeAudioCapture {
    format: AudioFormat,
    released: bool,
    log: CallLog,
}

impl AudioCapture for FakeAudioCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        self.log.lock().push("audio-capture:start".into());
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PipelineError> {
        self.log.lock().push("audio-capture:pause".into());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PipelineError> {
        std::thread::sleep(Duration::from_millis(5));
        buf.fill(0);
        Ok(buf.len())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().push("audio-capture:release".into());
        }
    }
}

// Muxer and GPU

struct FakeMuxer {
    writes: Arc<Mutex<Vec<(usize, i64)>>>,
    tracks: usize,
    log: CallLog,
}

impl Muxer for FakeMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
        self.log.lock().push(format!("muxer:add:{}", format.kind));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        self.log.lock().push("muxer:start".into());
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        _buffer: &EncodedBuffer,
        pts_us: i64,
    ) -> Result<(), MuxerError> {
        self.writes.lock().push((track, pts_us));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MuxerError> {
        self.log.lock().push("muxer:finish".into());
        Ok(())
    }

    fn discard(&mut self) -> Result<(), MuxerError> {
        self.log.lock().push("muxer:discard".into());
        Ok(())
    }
}

struct FakeContext {
    surface: Option<Arc<dyn InputSurface>>,
    released: bool,
    log: CallLog,
}

impl CompositingContext for FakeContext {
    fn bind(&mut self, surface: Arc<dyn InputSurface>) -> Result<(), CompositorError> {
        self.surface = Some(surface);
        Ok(())
    }

    fn create_frame_sink(&mut self, sink: SinkId) -> Result<(), CompositorError> {
        self.log.lock().push(format!("context:sink:{:?}", sink));
        Ok(())
    }

    fn upload(&mut self, _sink: SinkId, _frame: &CameraFrame) -> Result<(), CompositorError> {
        Ok(())
    }

    fn render_pass(&mut self, _commands: &[DrawCommand]) -> Result<(), CompositorError> {
        Ok(())
    }

    fn present(&mut self) -> Result<(), CompositorError> {
        let surface = self.surface.as_ref().ok_or(CompositorError::MissingSink)?;
        let (width, height) = surface.dimensions();
        surface
            .submit(RenderedFrame {
                width,
                height,
                data: Vec::new(),
            })
            .map_err(|e| CompositorError::Present(e.to_string()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().push("context:release".into());
        }
    }
}

/// Media backend built from the fakes above
pub struct FakeBackend {
    log: CallLog,
    fail_audio_capture: bool,
    pub muxer_options: Mutex<Option<MuxerOptions>>,
    pub writes: Arc<Mutex<Vec<(usize, i64)>>>,
}

impl FakeBackend {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_audio_capture: false,
            muxer_options: Mutex::new(None),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn without_microphone(mut self) -> Self {
        self.fail_audio_capture = true;
        self
    }

    pub fn written_samples(&self) -> usize {
        self.writes.lock().len()
    }
}

impl MediaBackend for FakeBackend {
    fn create_video_encoder(
        &self,
        settings: &VideoEncoderSettings,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        Ok(Box::new(FakeVideoEncoder {
            surface: Arc::new(FakeSurface {
                width: settings.width,
                height: settings.height,
                frames: AtomicU64::new(0),
            }),
            announced: false,
            eos_signalled: false,
            eos_sent: false,
            released: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn create_audio_encoder(
        &self,
        _format: AudioFormat,
        _bitrate_bps: u32,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        Ok(Box::new(FakeAudioEncoder {
            queued: VecDeque::new(),
            announced: false,
            eos_signalled: false,
            eos_sent: false,
            released: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn create_audio_capture(
        &self,
        _device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioCapture>, PipelineError> {
        if self.fail_audio_capture {
            return Err(PipelineError::Audio("no microphone".into()));
        }
        Ok(Box::new(FakeAudioCapture {
            format,
            released: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn create_muxer(
        &self,
        _sink: OutputSink,
        options: &MuxerOptions,
    ) -> Result<Box<dyn Muxer>, MuxerError> {
        *self.muxer_options.lock() = Some(options.clone());
        Ok(Box::new(FakeMuxer {
            writes: Arc::clone(&self.writes),
            tracks: 0,
            log: Arc::clone(&self.log),
        }))
    }

    fn create_compositing_context(
        &self,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn CompositingContext>, CompositorError> {
        Ok(Box::new(FakeContext {
            surface: None,
            released: false,
            log: Arc::clone(&self.log),
        }))
    }
}
