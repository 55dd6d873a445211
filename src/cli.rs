// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing cameras and microphones
//! - Listing encoders
//! - Recording a picture-in-picture video

use crate::{CodecArg, FacingArg, PositionArg, SizeArg};
use chrono::Local;
use dualcam::backends::audio::enumerate_audio_devices;
use dualcam::backends::camera::CameraProvider;
use dualcam::backends::camera::pipewire::PipeWireProvider;
use dualcam::config::RecorderSettings;
use dualcam::constants::{OUTPUT_PREFIX, format_bitrate};
use dualcam::media::encoders::{detect_audio_encoders, detect_video_encoders};
use dualcam::pipelines::dual::{
    DualCameraRecorder, GstMediaBackend, LifecycleEvent, OutputSink, RecorderState,
    RecordingRequest, WatermarkSupplier,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(clap::Args)]
pub struct RecordArgs {
    /// Recording duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Output file path (default: ~/Videos/DualCam/DualCam_TIMESTAMP.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Settings file (default: ~/.config/dualcam/settings.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera shown full-screen
    #[arg(long, value_enum)]
    primary: Option<FacingArg>,

    #[arg(long, value_enum)]
    codec: Option<CodecArg>,

    /// Video bitrate in kbps, overrides the preset
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Corner of the inset
    #[arg(long, value_enum)]
    pip_position: Option<PositionArg>,

    #[arg(long, value_enum)]
    pip_size: Option<SizeArg>,

    /// Draw the inset without a border
    #[arg(long)]
    no_border: bool,

    /// Draw the inset with square corners
    #[arg(long)]
    no_rounded: bool,

    /// Exchange full-screen and inset after this many seconds
    #[arg(long)]
    swap_after: Option<u64>,

    /// Record without a microphone track
    #[arg(long)]
    no_audio: bool,

    /// Text burned into the bottom of the video
    #[arg(long)]
    watermark: Option<String>,
}

/// List cameras and microphones
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let cameras = PipeWireProvider::new().enumerate();
    if cameras.is_empty() {
        println!("No cameras found.");
    } else {
        println!("Available cameras:");
        println!();
        for (index, camera) in cameras.iter().enumerate() {
            println!("  [{}] {}", index, camera.name);
            println!(
                "      Id: {}  Facing: {:?}  Rotation: {}",
                camera.id, camera.facing, camera.rotation
            );
        }
    }
    println!();

    let microphones = enumerate_audio_devices();
    if microphones.is_empty() {
        println!("No microphones found.");
    } else {
        println!("Available microphones:");
        println!();
        for mic in &microphones {
            let default = if mic.is_default { " (default)" } else { "" };
            println!("  [{}] {}{}", mic.serial, mic.name, default);
        }
    }

    Ok(())
}

/// List installed encoders in selection order
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    println!("Video encoders:");
    for info in detect_video_encoders() {
        println!(
            "  {:<14} {:<24} {}",
            info.element_name,
            info.display_name,
            info.codec.display_name()
        );
    }
    println!();
    println!("Audio encoders:");
    for name in detect_audio_encoders() {
        println!("  {}", name);
    }
    Ok(())
}

/// Write default settings so they can be edited
pub fn init_config(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = path
        .or_else(RecorderSettings::default_path)
        .ok_or("Could not determine the settings directory")?;
    RecorderSettings::default().save(&path)?;
    println!("Settings written: {}", path.display());
    Ok(())
}

fn load_settings(args: &RecordArgs) -> Result<RecorderSettings, Box<dyn std::error::Error>> {
    let mut settings = match args.config.as_ref() {
        Some(path) => RecorderSettings::load(path)?,
        None => match RecorderSettings::default_path() {
            Some(path) => RecorderSettings::load_or_default(&path)?,
            None => RecorderSettings::default(),
        },
    };

    if let Some(primary) = args.primary {
        settings.pip = settings.pip.with_primary(primary.into());
    }
    if let Some(codec) = args.codec {
        settings.codec = codec.into();
    }
    if args.bitrate.is_some() {
        settings.bitrate_kbps = args.bitrate;
    }
    if let Some(position) = args.pip_position {
        settings.pip = settings.pip.with_position(position.into());
    }
    if let Some(size) = args.pip_size {
        settings.pip = settings.pip.with_size(size.into());
    }
    if args.no_border {
        settings.pip = settings.pip.with_border(false);
    }
    if args.no_rounded {
        settings.pip = settings.pip.with_rounded_corners(false);
    }
    if args.no_audio {
        settings.audio.enabled = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn print_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Started { mode, output } => {
            println!();
            println!("Recording started ({:?}): {}", mode, output);
        }
        LifecycleEvent::ModeChanged { mode } => {
            println!();
            println!("Second camera lost, now {:?}", mode);
        }
        LifecycleEvent::SourcesSwapped { swapped } => {
            println!();
            println!("Sources swapped (swapped: {})", swapped);
        }
        LifecycleEvent::Error {
            reason,
            recording_incomplete,
        } => {
            println!();
            println!("Recording failed: {}", reason);
            if *recording_incomplete {
                println!("The output file may be incomplete.");
            }
        }
        _ => {}
    }
}

/// Record until the duration elapses, Ctrl+C, or a failure
pub fn record(args: RecordArgs) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let settings = load_settings(&args)?;

    let output_path = if let Some(path) = args.output.clone() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        path
    } else {
        let dir = get_default_video_dir();
        std::fs::create_dir_all(&dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        dir.join(format!("{}_{}.mp4", OUTPUT_PREFIX, timestamp))
    };

    println!("Output: {}", output_path.display());
    println!(
        "Video: {}x{} @ {}fps, {} {}",
        settings.width,
        settings.height,
        settings.framerate,
        settings.codec.display_name(),
        format_bitrate(settings.video_bitrate_kbps())
    );
    println!(
        "Audio: {}",
        if settings.audio.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("Duration: {} seconds", args.duration);

    let watermark: Option<WatermarkSupplier> = args.watermark.clone().map(|text| {
        let supplier: WatermarkSupplier = Arc::new(move || Some(text.clone()));
        supplier
    });

    let (recorder, mut events) =
        DualCameraRecorder::new(Arc::new(PipeWireProvider::new()), Arc::new(GstMediaBackend))?;

    recorder.start(RecordingRequest {
        encoding: settings.encoding_config(),
        pip: settings.pip,
        sink: OutputSink::Path(output_path.clone()),
        timing: settings.timing.to_timing_config(),
        watermark,
    })?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!();
    println!("Opening cameras... (press Ctrl+C to stop early)");

    let start = Instant::now();
    let target_duration = Duration::from_secs(args.duration);
    let swap_at = args.swap_after.map(Duration::from_secs);
    let mut swapped_once = false;
    let mut failed = false;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        while let Ok(event) = events.try_recv() {
            print_event(&event);
            failed |= matches!(event, LifecycleEvent::Error { .. });
        }
        if failed || recorder.state() == RecorderState::Error {
            break;
        }

        if let Some(at) = swap_at
            && !swapped_once
            && start.elapsed() >= at
            && recorder.state() == RecorderState::Recording
        {
            recorder.swap_sources()?;
            swapped_once = true;
        }

        if recorder.state() == RecorderState::Recording {
            let elapsed = start.elapsed().as_secs();
            print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
            std::io::Write::flush(&mut std::io::stdout())?;
        }

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    recorder.stop()?;
    while let Ok(event) = events.try_recv() {
        match event {
            LifecycleEvent::Stopped { output, stats } => {
                println!(
                    "Video saved: {} ({} frames, {:.1}s)",
                    output,
                    stats.video_samples,
                    stats.video_duration().as_secs_f64()
                );
                if stats.snapshot_attempts > 0 {
                    println!(
                        "Snapshots: {} ok, {} failed",
                        stats.snapshot_successes, stats.snapshot_failures
                    );
                }
            }
            other => print_event(&other),
        }
    }

    if failed {
        return Err("Recording failed".into());
    }
    Ok(())
}

/// Get default video directory
fn get_default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(OUTPUT_PREFIX)
}
