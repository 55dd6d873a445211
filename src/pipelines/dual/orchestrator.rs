// SPDX-License-Identifier: GPL-3.0-only

//! Capture session orchestrator
//!
//! [`DualCameraRecorder`] is the control surface. Every command, device
//! callback, timer and pipeline failure is turned into a [`Message`] and
//! handled in order on one orchestrator thread, which owns the capture
//! sessions, the encoding pipeline and the snapshot scheduler.
//!
//! ```text
//! DISABLED ──start──▶ INITIALIZING ──▶ RECORDING ⇄ PAUSED ──stop──▶ DISABLED
//!                          │                │          │
//!                          └───── fatal ────┴──────────┴──▶ ERROR ──stop──▶ DISABLED
//! ```
//!
//! Opening is sequential: the primary camera opens, the compositor and
//! encoders are built, the primary starts streaming, and only then (after
//! a short settle delay) is the secondary opened. If that fails the
//! recording continues in fallback mode with periodic snapshots.

use crate::backends::camera::{
    CameraControl, CameraDevice, CameraProvider, CaptureRequest, ConcurrencySupport,
    DeviceEvent, EventFn, FrameSlot, FrameTarget, SessionRole, SessionTag,
};
use crate::constants::timing;
use crate::errors::{AppError, AppResult, CapabilityError, PipelineError, SessionError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::MediaBackend;
use super::compositor::CompositorControls;
use super::encoding::{EncodingConfig, EncodingPipeline, FatalHandler};
use super::events::{LifecycleEvent, OperatingMode, OutputSink, PipelineStats, StatsSnapshot};
use super::layout::{CameraFacing, PipConfig};
use super::session::{CaptureSession, SessionTransition};
use super::snapshot::{FallbackSnapshotScheduler, ScheduledTick, TickDecision};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Disabled,
    Initializing,
    Recording,
    Paused,
    /// Absorbing until `stop`
    Error,
}

/// Delays used while opening and in fallback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub secondary_open_delay: Duration,
    pub snapshot_interval: Duration,
    pub snapshot_initial_delay: Duration,
    pub snapshot_settle_frames: u32,
    pub snapshot_attempt_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            secondary_open_delay: timing::SECONDARY_OPEN_DELAY,
            snapshot_interval: timing::SNAPSHOT_INTERVAL,
            snapshot_initial_delay: timing::SNAPSHOT_INITIAL_DELAY,
            snapshot_settle_frames: timing::SNAPSHOT_SETTLE_FRAMES,
            snapshot_attempt_timeout: timing::SNAPSHOT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Supplies the watermark text, called once per encoder setup
pub type WatermarkSupplier = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Everything needed to start one recording
pub struct RecordingRequest {
    pub encoding: EncodingConfig,
    /// `primary` is read once here; later updates only change the layout
    pub pip: PipConfig,
    pub sink: OutputSink,
    pub timing: TimingConfig,
    pub watermark: Option<WatermarkSupplier>,
}

impl std::fmt::Debug for RecordingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRequest")
            .field("encoding", &self.encoding)
            .field("pip", &self.pip)
            .field("sink", &self.sink.describe())
            .field("timing", &self.timing)
            .finish()
    }
}

/// Pick the primary camera by facing and a partner for it
///
/// The partner prefers the opposite facing; any other camera will do.
pub fn select_devices(
    devices: &[CameraDevice],
    primary_facing: CameraFacing,
) -> Result<(CameraDevice, Option<CameraDevice>), CapabilityError> {
    let primary = devices
        .iter()
        .find(|d| d.facing == primary_facing)
        .or_else(|| devices.first())
        .ok_or(CapabilityError::NoCameraFound)?;

    let secondary = devices
        .iter()
        .filter(|d| d.id != primary.id)
        .find(|d| d.facing == primary_facing.opposite())
        .or_else(|| devices.iter().find(|d| d.id != primary.id));

    Ok((primary.clone(), secondary.cloned()))
}

type Reply<T> = oneshot::Sender<AppResult<T>>;

enum Command {
    Start(Box<RecordingRequest>, Reply<()>),
    Stop(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Swap(Reply<bool>),
    UpdateConfig(PipConfig, Reply<()>),
    Control(CameraControl, Reply<bool>),
}

enum Message {
    Command(Command),
    Device(SessionTag, DeviceEvent),
    OpenSecondary { run: u64 },
    SnapshotTick { run: u64, epoch: u64 },
    SnapshotTimeout { run: u64, generation: u64 },
    PipelineFailed { run: u64, error: PipelineError },
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: RecorderState,
    mode: Option<OperatingMode>,
}

/// Control surface of the dual-camera recorder
///
/// Commands block until the orchestrator thread has handled them. Do not
/// call them from inside an async runtime.
pub struct DualCameraRecorder {
    tx: mpsc::UnboundedSender<Message>,
    status: Arc<RwLock<Status>>,
    stats: Arc<PipelineStats>,
    worker: Option<JoinHandle<()>>,
}

impl DualCameraRecorder {
    /// Start the orchestrator thread; lifecycle events arrive on the
    /// returned receiver
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        backend: Arc<dyn MediaBackend>,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<LifecycleEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(Status::default()));
        let stats = Arc::new(PipelineStats::default());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| PipelineError::Thread(format!("Failed to build runtime: {}", e)))?;

        let orchestrator = Orchestrator {
            provider,
            backend,
            tx: tx.clone(),
            events: events_tx,
            status: Arc::clone(&status),
            stats: Arc::clone(&stats),
            state: RecorderState::Disabled,
            next_run: 0,
            next_generation: 0,
            run: None,
        };

        let worker = std::thread::Builder::new()
            .name("dualcam-orchestrator".into())
            .spawn(move || runtime.block_on(orchestrator.run(rx)))
            .map_err(|e| PipelineError::Thread(format!("Failed to spawn orchestrator: {}", e)))?;

        Ok((
            Self {
                tx,
                status,
                stats,
                worker: Some(worker),
            },
            events_rx,
        ))
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> AppResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Message::Command(make(reply_tx)))
            .map_err(|_| PipelineError::Thread("Orchestrator is not running".into()))?;
        reply_rx
            .blocking_recv()
            .map_err(|_| PipelineError::Thread("Orchestrator dropped the command".into()))?
    }

    /// Begin opening cameras; `Started` follows once recording runs
    pub fn start(&self, request: RecordingRequest) -> AppResult<()> {
        self.call(|reply| Command::Start(Box::new(request), reply))
    }

    /// Tear everything down and return to `Disabled`; idempotent
    pub fn stop(&self) -> AppResult<()> {
        self.call(Command::Stop)
    }

    pub fn pause(&self) -> AppResult<()> {
        self.call(Command::Pause)
    }

    pub fn resume(&self) -> AppResult<()> {
        self.call(Command::Resume)
    }

    /// Exchange full-screen and inset sources; returns the new swap state
    pub fn swap_sources(&self) -> AppResult<bool> {
        self.call(Command::Swap)
    }

    pub fn update_config(&self, config: PipConfig) -> AppResult<()> {
        self.call(|reply| Command::UpdateConfig(config, reply))
    }

    /// Forward a camera control to the originally-primary camera
    ///
    /// Returns whether an open device applied it. Controls the device has
    /// no support for give `Ok(false)`; a failed write is an error.
    pub fn apply_control(&self, control: CameraControl) -> AppResult<bool> {
        self.call(|reply| Command::Control(control, reply))
    }

    pub fn state(&self) -> RecorderState {
        self.status.read().state
    }

    pub fn mode(&self) -> Option<OperatingMode> {
        self.status.read().mode
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for DualCameraRecorder {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Orchestrator thread panicked");
        }
    }
}

enum Plan {
    /// Try to open `secondary` next to the primary
    TryConcurrent(CameraDevice),
    /// One camera feeds both frame sinks
    SingleSource,
}

/// Everything owned by one recording attempt
struct Run {
    id: u64,
    plan: Plan,
    primary_device: CameraDevice,
    encoding: EncodingConfig,
    pip: PipConfig,
    timing: TimingConfig,
    watermark: Option<WatermarkSupplier>,
    sink: Option<OutputSink>,
    output: String,
    slots: [Arc<FrameSlot>; 2],
    primary: Option<CaptureSession>,
    secondary: Option<CaptureSession>,
    snapshot: Option<CaptureSession>,
    scheduler: FallbackSnapshotScheduler,
    controls: Option<CompositorControls>,
    pipeline: Option<EncodingPipeline>,
    primary_configured: bool,
    mode: Option<OperatingMode>,
    started: bool,
}

impl Run {
    fn secondary_device(&self) -> Option<&CameraDevice> {
        match &self.plan {
            Plan::TryConcurrent(device) => Some(device),
            Plan::SingleSource => None,
        }
    }

    fn session_mut(&mut self, tag: SessionTag) -> Option<&mut CaptureSession> {
        let session = match tag.role {
            SessionRole::Primary => self.primary.as_mut(),
            SessionRole::Secondary => self.secondary.as_mut(),
            SessionRole::Snapshot => self.snapshot.as_mut(),
        };
        session.filter(|s| s.tag() == tag)
    }
}

struct Orchestrator {
    provider: Arc<dyn CameraProvider>,
    backend: Arc<dyn MediaBackend>,
    tx: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    status: Arc<RwLock<Status>>,
    stats: Arc<PipelineStats>,
    state: RecorderState,
    next_run: u64,
    next_generation: u64,
    run: Option<Run>,
}

impl Orchestrator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        debug!("Orchestrator running");
        while let Some(message) = rx.recv().await {
            if !self.handle(message) {
                break;
            }
        }
        if self.run.is_some() {
            self.teardown();
        }
        self.set_state(RecorderState::Disabled, None);
        debug!("Orchestrator exited");
    }

    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Command(command) => self.handle_command(command),
            Message::Device(tag, event) => self.handle_device_event(tag, event),
            Message::OpenSecondary { run } => {
                if self.is_current(run) {
                    self.open_secondary();
                }
            }
            Message::SnapshotTick { run, epoch } => {
                if self.is_current(run) {
                    self.on_snapshot_tick(epoch);
                }
            }
            Message::SnapshotTimeout { run, generation } => {
                if self.is_current(run) {
                    self.on_snapshot_timeout(generation);
                }
            }
            Message::PipelineFailed { run, error } => {
                if self.is_current(run) {
                    self.enter_error(format!("Encoding pipeline failed: {}", error));
                }
            }
            Message::Shutdown => return false,
        }
        true
    }

    fn is_current(&self, run: u64) -> bool {
        self.run.as_ref().is_some_and(|r| r.id == run)
    }

    fn set_state(&mut self, state: RecorderState, mode: Option<OperatingMode>) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Recorder state");
        }
        self.state = state;
        *self.status.write() = Status { state, mode };
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle event");
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn schedule(&self, delay: Duration, message: Message) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message);
        });
    }

    fn event_sink(&self) -> Arc<EventFn> {
        let tx = self.tx.clone();
        Arc::new(move |tag, event| {
            let _ = tx.send(Message::Device(tag, event));
        })
    }

    fn next_tag(&mut self, role: SessionRole) -> SessionTag {
        self.next_generation += 1;
        SessionTag {
            role,
            generation: self.next_generation,
        }
    }

    // Commands

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(request, reply) => {
                let _ = reply.send(self.start(*request));
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            Command::Swap(reply) => {
                let _ = reply.send(self.swap());
            }
            Command::UpdateConfig(config, reply) => {
                let _ = reply.send(self.update_config(config));
            }
            Command::Control(control, reply) => {
                let _ = reply.send(self.apply_control(control));
            }
        }
    }

    fn invalid_state(&self, action: &str) -> AppError {
        AppError::InvalidState(format!("Cannot {} while {:?}", action, self.state))
    }

    fn start(&mut self, request: RecordingRequest) -> AppResult<()> {
        if self.state != RecorderState::Disabled {
            return Err(self.invalid_state("start"));
        }

        info!(?request, "Starting dual camera recording");
        self.next_run += 1;
        self.stats.reset();
        self.set_state(RecorderState::Initializing, None);

        let plan = match self.plan(request.pip.primary) {
            Ok(plan) => plan,
            Err(e) => {
                // Nothing opened yet: no run to tear down
                error!(error = %e, "Capability check failed");
                self.set_state(RecorderState::Error, None);
                self.emit(LifecycleEvent::Error {
                    reason: e.to_string(),
                    recording_incomplete: false,
                });
                return Err(e.into());
            }
        };
        let (primary_device, plan) = plan;

        let run = Run {
            id: self.next_run,
            plan,
            primary_device,
            output: request.sink.describe(),
            encoding: request.encoding,
            pip: request.pip,
            timing: request.timing,
            watermark: request.watermark,
            sink: Some(request.sink),
            slots: [FrameSlot::new(), FrameSlot::new()],
            primary: None,
            secondary: None,
            snapshot: None,
            scheduler: FallbackSnapshotScheduler::new(
                request.timing.snapshot_interval,
                request.timing.snapshot_initial_delay,
            ),
            controls: None,
            pipeline: None,
            primary_configured: false,
            mode: None,
            started: false,
        };
        let primary_device = run.primary_device.clone();
        self.run = Some(run);

        let tag = self.next_tag(SessionRole::Primary);
        match CaptureSession::open(
            self.provider.as_ref(),
            &primary_device,
            tag,
            CaptureRequest::record(),
            self.event_sink(),
        ) {
            Ok(session) => {
                if let Some(run) = self.run.as_mut() {
                    run.primary = Some(session);
                }
                Ok(())
            }
            Err(e) => {
                let reason = format!("Primary camera: {}", e);
                self.enter_error(reason);
                Err(e.into())
            }
        }
    }

    fn plan(&self, primary_facing: CameraFacing) -> Result<(CameraDevice, Plan), CapabilityError> {
        self.provider.check_permissions()?;
        let devices = self.provider.enumerate();
        let (primary, secondary) = select_devices(&devices, primary_facing)?;

        let plan = match secondary {
            None => {
                warn!(
                    primary = %primary.id,
                    "Only one camera available, using it for both sources"
                );
                Plan::SingleSource
            }
            Some(secondary) => match self.provider.concurrency(&primary, &secondary) {
                ConcurrencySupport::Unsupported => {
                    warn!(
                        error = %CapabilityError::ConcurrencyUnsupported,
                        primary = %primary.id,
                        secondary = %secondary.id,
                        "Using one camera for both sources"
                    );
                    Plan::SingleSource
                }
                support => {
                    debug!(?support, secondary = %secondary.id, "Will try concurrent capture");
                    Plan::TryConcurrent(secondary)
                }
            },
        };
        Ok((primary, plan))
    }

    fn stop(&mut self) {
        match self.state {
            RecorderState::Disabled => debug!("Stop while disabled"),
            RecorderState::Error => {
                // Already torn down on entry to ERROR
                self.run = None;
                self.set_state(RecorderState::Disabled, None);
            }
            RecorderState::Initializing | RecorderState::Recording | RecorderState::Paused => {
                info!(state = ?self.state, "Stopping dual camera recording");
                let (output, finalized) = self.teardown();
                self.set_state(RecorderState::Disabled, None);
                let stats = self.stats.snapshot();
                info!(
                    output = %output,
                    finalized,
                    video_samples = stats.video_samples,
                    "Recording stopped"
                );
                self.emit(LifecycleEvent::Stopped { output, stats });
            }
        }
    }

    fn pause(&mut self) -> AppResult<()> {
        let run = match (self.state, self.run.as_ref()) {
            (RecorderState::Recording, Some(run)) => run,
            _ => return Err(self.invalid_state("pause")),
        };
        if let Some(pipeline) = &run.pipeline {
            pipeline.pause();
        }
        let mode = run.mode;
        self.set_state(RecorderState::Paused, mode);
        self.emit(LifecycleEvent::Paused);
        Ok(())
    }

    fn resume(&mut self) -> AppResult<()> {
        let run = match (self.state, self.run.as_ref()) {
            (RecorderState::Paused, Some(run)) => run,
            _ => return Err(self.invalid_state("resume")),
        };
        if let Some(pipeline) = &run.pipeline {
            pipeline.resume();
        }
        let mode = run.mode;
        self.set_state(RecorderState::Recording, mode);
        self.emit(LifecycleEvent::Resumed);
        Ok(())
    }

    fn live_controls(&self) -> Option<&CompositorControls> {
        match self.state {
            RecorderState::Initializing | RecorderState::Recording | RecorderState::Paused => {
                self.run.as_ref().and_then(|run| run.controls.as_ref())
            }
            RecorderState::Disabled | RecorderState::Error => None,
        }
    }

    fn swap(&mut self) -> AppResult<bool> {
        let swapped = self
            .live_controls()
            .map(CompositorControls::swap)
            .ok_or_else(|| self.invalid_state("swap sources"))?;
        info!(swapped, "Sources swapped");
        self.emit(LifecycleEvent::SourcesSwapped { swapped });
        Ok(swapped)
    }

    fn update_config(&mut self, config: PipConfig) -> AppResult<()> {
        let controls = self
            .live_controls()
            .ok_or_else(|| self.invalid_state("update configuration"))?;
        if config.primary != controls.current().config.primary {
            debug!(
                primary = ?config.primary,
                "Primary camera is chosen at start, use swap to exchange"
            );
        }
        controls.update_config(config);
        if let Some(run) = self.run.as_mut() {
            run.pip = config;
        }
        self.emit(LifecycleEvent::ConfigUpdated);
        Ok(())
    }

    fn apply_control(&mut self, control: CameraControl) -> AppResult<bool> {
        let Some(session) = self.run.as_mut().and_then(|run| run.primary.as_mut()) else {
            debug!(?control, "No camera session, control ignored");
            return Ok(false);
        };
        // A rejected write leaves the session streaming; the caller decides
        session.apply_control(control).map_err(|e| {
            warn!(error = %e, ?control, "Failed to apply camera control");
            AppError::from(e)
        })
    }

    // Device events

    fn handle_device_event(&mut self, tag: SessionTag, event: DeviceEvent) {
        let Some(session) = self.run.as_mut().and_then(|run| run.session_mut(tag)) else {
            debug!(?tag, ?event, "Event for unknown session");
            if let DeviceEvent::Opened(mut handle) = event {
                handle.close();
            }
            return;
        };

        let transition = session.handle_event(event);
        match tag.role {
            SessionRole::Primary => self.on_primary(transition),
            SessionRole::Secondary => self.on_secondary(transition),
            SessionRole::Snapshot => self.on_snapshot(transition),
        }
    }

    fn on_primary(&mut self, transition: SessionTransition) {
        match transition {
            SessionTransition::Opened => {
                if self.state != RecorderState::Initializing {
                    return;
                }
                if let Err(e) = self.prepare_pipeline() {
                    self.enter_error(format!("Pipeline setup failed: {}", e));
                    return;
                }
                let result = self.run.as_mut().map(|run| {
                    let target = match run.plan {
                        Plan::SingleSource => FrameTarget::fan_out(run.slots.iter().cloned()),
                        Plan::TryConcurrent(_) => FrameTarget::single(Arc::clone(&run.slots[0])),
                    };
                    match run.primary.as_mut() {
                        Some(session) => session.start_repeating(target),
                        None => Err(SessionError::NotOpen),
                    }
                });
                if let Some(Err(e)) = result {
                    self.enter_error(format!("Primary camera: {}", e));
                }
            }
            SessionTransition::Configured => {
                let Some(run) = self.run.as_mut() else {
                    return;
                };
                if self.state != RecorderState::Initializing || run.primary_configured {
                    return;
                }
                run.primary_configured = true;
                let single = matches!(run.plan, Plan::SingleSource);
                let (id, delay) = (run.id, run.timing.secondary_open_delay);
                if single {
                    self.begin_recording(OperatingMode::SingleSource);
                } else {
                    self.schedule(delay, Message::OpenSecondary { run: id });
                }
            }
            SessionTransition::Failed(e) => self.enter_error(format!("Primary camera: {}", e)),
            SessionTransition::CaptureCompleted
            | SessionTransition::CaptureFailed(_)
            | SessionTransition::Ignored => {}
        }
    }

    /// Build compositor controls and the encoding pipeline for the run
    fn prepare_pipeline(&mut self) -> Result<(), PipelineError> {
        let run_id = self.run.as_ref().map(|r| r.id).unwrap_or_default();
        let tx = self.tx.clone();
        let on_fatal: FatalHandler = Arc::new(move |error| {
            let _ = tx.send(Message::PipelineFailed { run: run_id, error });
        });
        let backend = Arc::clone(&self.backend);
        let stats = Arc::clone(&self.stats);

        let run = self
            .run
            .as_mut()
            .ok_or_else(|| PipelineError::Thread("No active run".into()))?;
        let sink = run
            .sink
            .take()
            .ok_or_else(|| PipelineError::Sink("Output sink already used".into()))?;

        let controls = CompositorControls::new(run.pip, run.encoding.width, run.encoding.height);
        let watermark = run.watermark.as_ref().and_then(|supplier| supplier());

        let pipeline = EncodingPipeline::prepare(
            &run.encoding,
            backend,
            sink,
            watermark,
            [Arc::clone(&run.slots[0]), Arc::clone(&run.slots[1])],
            controls.clone(),
            stats,
            on_fatal,
        )?;

        run.controls = Some(controls);
        run.pipeline = Some(pipeline);
        Ok(())
    }

    fn open_secondary(&mut self) {
        if self.state != RecorderState::Initializing {
            return;
        }
        let Some(device) = self.run.as_ref().and_then(|r| r.secondary_device().cloned()) else {
            return;
        };

        let tag = self.next_tag(SessionRole::Secondary);
        match CaptureSession::open(
            self.provider.as_ref(),
            &device,
            tag,
            CaptureRequest::record(),
            self.event_sink(),
        ) {
            Ok(session) => {
                if let Some(run) = self.run.as_mut() {
                    run.secondary = Some(session);
                }
            }
            Err(e) => self.secondary_failed(e),
        }
    }

    fn on_secondary(&mut self, transition: SessionTransition) {
        match transition {
            SessionTransition::Opened => {
                let result = self.run.as_mut().and_then(|run| {
                    let target = FrameTarget::single(Arc::clone(&run.slots[1]));
                    run.secondary.as_mut().map(|s| s.start_repeating(target))
                });
                if let Some(Err(e)) = result {
                    self.secondary_failed(e);
                }
            }
            SessionTransition::Configured => {
                if self.state == RecorderState::Initializing {
                    self.begin_recording(OperatingMode::Concurrent);
                }
            }
            SessionTransition::Failed(e) => self.secondary_failed(e),
            SessionTransition::CaptureCompleted
            | SessionTransition::CaptureFailed(_)
            | SessionTransition::Ignored => {}
        }
    }

    /// Secondary errors never end the recording; they switch to fallback
    fn secondary_failed(&mut self, error: SessionError) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if let Some(mut session) = run.secondary.take() {
            session.close();
        }

        match self.state {
            RecorderState::Initializing => {
                warn!(error = %error, "Secondary camera unavailable, using snapshot fallback");
                self.activate_fallback();
                self.begin_recording(OperatingMode::Fallback);
            }
            RecorderState::Recording | RecorderState::Paused => {
                if run.mode != Some(OperatingMode::Concurrent) {
                    return;
                }
                warn!(error = %error, "Secondary camera lost, switching to snapshot fallback");
                run.mode = Some(OperatingMode::Fallback);
                let state = self.state;
                self.set_state(state, Some(OperatingMode::Fallback));
                self.activate_fallback();
                self.emit(LifecycleEvent::ModeChanged {
                    mode: OperatingMode::Fallback,
                });
            }
            RecorderState::Disabled | RecorderState::Error => {}
        }
    }

    fn begin_recording(&mut self, mode: OperatingMode) {
        let result = match self.run.as_mut() {
            Some(run) => match run.pipeline.as_mut() {
                Some(pipeline) => pipeline.start().map(|()| {
                    run.mode = Some(mode);
                    run.started = true;
                    run.output.clone()
                }),
                None => Err(PipelineError::Thread("Pipeline not prepared".into())),
            },
            None => return,
        };

        match result {
            Ok(output) => {
                info!(?mode, output = %output, "Recording started");
                self.set_state(RecorderState::Recording, Some(mode));
                self.emit(LifecycleEvent::Started { mode, output });
            }
            Err(e) => self.enter_error(format!("Failed to start encoding: {}", e)),
        }
    }

    // Fallback snapshots

    fn activate_fallback(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if let Some(tick) = run.scheduler.activate() {
            let id = run.id;
            self.schedule_tick(id, tick);
        }
    }

    fn schedule_tick(&self, run: u64, tick: ScheduledTick) {
        self.schedule(
            tick.delay,
            Message::SnapshotTick {
                run,
                epoch: tick.epoch,
            },
        );
    }

    fn on_snapshot_tick(&mut self, epoch: u64) {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return;
        }
        let Some(run) = self.run.as_mut() else {
            return;
        };
        match run.scheduler.on_tick(epoch) {
            TickDecision::BeginAttempt => self.begin_snapshot(),
            TickDecision::Deferred => debug!("Snapshot attempt in flight, tick deferred"),
            TickDecision::Stale => {}
        }
    }

    fn begin_snapshot(&mut self) {
        let Some(device) = self.run.as_ref().and_then(|r| r.secondary_device().cloned()) else {
            self.finish_snapshot(false);
            return;
        };
        self.stats.record_snapshot_attempt();
        debug!(device = %device.id, "Starting fallback snapshot");

        let tag = self.next_tag(SessionRole::Snapshot);
        match CaptureSession::open(
            self.provider.as_ref(),
            &device,
            tag,
            CaptureRequest::still_capture(),
            self.event_sink(),
        ) {
            Ok(session) => {
                let Some(run) = self.run.as_mut() else {
                    return;
                };
                run.snapshot = Some(session);
                let (id, timeout) = (run.id, run.timing.snapshot_attempt_timeout);
                self.schedule(
                    timeout,
                    Message::SnapshotTimeout {
                        run: id,
                        generation: tag.generation,
                    },
                );
            }
            Err(e) => {
                debug!(error = %e, "Snapshot open failed");
                self.finish_snapshot(false);
            }
        }
    }

    fn on_snapshot(&mut self, transition: SessionTransition) {
        match transition {
            SessionTransition::Opened => {
                let result = self.run.as_mut().and_then(|run| {
                    let target = FrameTarget::single(Arc::clone(&run.slots[1]));
                    let settle = run.timing.snapshot_settle_frames;
                    run.snapshot
                        .as_mut()
                        .map(|s| s.capture_single(target, settle))
                });
                if let Some(Err(e)) = result {
                    debug!(error = %e, "Snapshot capture could not start");
                    self.finish_snapshot(false);
                }
            }
            SessionTransition::CaptureCompleted => self.finish_snapshot(true),
            SessionTransition::CaptureFailed(e) | SessionTransition::Failed(e) => {
                // Transient: retried on the next cycle
                debug!(error = %e, "Snapshot attempt failed");
                self.finish_snapshot(false);
            }
            SessionTransition::Configured | SessionTransition::Ignored => {}
        }
    }

    fn on_snapshot_timeout(&mut self, generation: u64) {
        let timed_out = self
            .run
            .as_ref()
            .and_then(|r| r.snapshot.as_ref())
            .is_some_and(|s| s.tag().generation == generation);
        if timed_out {
            warn!(generation, "Snapshot attempt timed out");
            self.finish_snapshot(false);
        }
    }

    fn finish_snapshot(&mut self, success: bool) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if let Some(mut session) = run.snapshot.take() {
            session.close();
        }
        self.stats.record_snapshot_result(success);
        if let Some(tick) = run.scheduler.on_attempt_finished() {
            let id = run.id;
            self.schedule_tick(id, tick);
        }
    }

    // Teardown

    /// Single fatal path: tear down, enter ERROR, report once
    fn enter_error(&mut self, reason: String) {
        if matches!(self.state, RecorderState::Error | RecorderState::Disabled) {
            debug!(reason = %reason, state = ?self.state, "Ignoring failure in terminal state");
            return;
        }
        error!(reason = %reason, "Recording failed");
        let recording_incomplete = self.run.as_ref().is_some_and(|r| r.started);
        self.teardown();
        self.set_state(RecorderState::Error, None);
        self.emit(LifecycleEvent::Error {
            reason,
            recording_incomplete,
        });
    }

    /// Release every resource of the current run
    ///
    /// Order: capture sessions, then the pipeline (encoders, GPU context,
    /// muxer). Every step runs; failures are logged.
    fn teardown(&mut self) -> (String, bool) {
        let Some(mut run) = self.run.take() else {
            return (String::new(), false);
        };
        debug!(run = run.id, "Tearing down");

        run.scheduler.deactivate();
        for mut session in [run.snapshot.take(), run.secondary.take(), run.primary.take()]
            .into_iter()
            .flatten()
        {
            session.close();
        }

        let finalized = match run.pipeline.take() {
            Some(mut pipeline) => {
                let report = pipeline.stop();
                for e in &report.errors {
                    warn!(error = %e, "Teardown step failed");
                }
                report.finalized
            }
            None => false,
        };
        run.controls = None;
        (run.output, finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::SensorRotation;

    fn device(id: &str, facing: CameraFacing) -> CameraDevice {
        CameraDevice {
            id: id.into(),
            name: id.into(),
            facing,
            rotation: SensorRotation::None,
            v4l2_path: None,
        }
    }

    #[test]
    fn test_select_devices_by_facing() {
        let devices = vec![
            device("front", CameraFacing::Front),
            device("back", CameraFacing::Back),
        ];
        let (primary, secondary) = select_devices(&devices, CameraFacing::Back).unwrap();
        assert_eq!(primary.id, "back");
        assert_eq!(secondary.unwrap().id, "front");

        let (primary, secondary) = select_devices(&devices, CameraFacing::Front).unwrap();
        assert_eq!(primary.id, "front");
        assert_eq!(secondary.unwrap().id, "back");
    }

    #[test]
    fn test_select_devices_single_and_empty() {
        let devices = vec![device("only", CameraFacing::Front)];
        let (primary, secondary) = select_devices(&devices, CameraFacing::Back).unwrap();
        assert_eq!(primary.id, "only");
        assert!(secondary.is_none());

        assert_eq!(
            select_devices(&[], CameraFacing::Back).unwrap_err(),
            CapabilityError::NoCameraFound
        );
    }

    #[test]
    fn test_select_devices_same_facing_partner() {
        let devices = vec![
            device("a", CameraFacing::Back),
            device("b", CameraFacing::Back),
        ];
        let (primary, secondary) = select_devices(&devices, CameraFacing::Back).unwrap();
        assert_eq!(primary.id, "a");
        assert_eq!(secondary.unwrap().id, "b");
    }
}
