// SPDX-License-Identifier: MPL-2.0

//! Container writer
//!
//! [`Muxer`] is the seam used by [`ContainerState`](super::container::ContainerState).
//! [`GstMuxer`] feeds already-encoded samples into `mp4mux` through one
//! `appsrc` per track and writes a fragmented MP4 to a file or descriptor.

use crate::constants::timing;
use crate::errors::MuxerError;
use crate::media::codec::{EncodedBuffer, TrackFormat, TrackKind};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::events::OutputSink;

/// Multiplexes encoded tracks into one container
pub trait Muxer: Send {
    /// Add a track, returning its index
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError>;

    fn start(&mut self) -> Result<(), MuxerError>;

    fn write_sample(
        &mut self,
        track: usize,
        buffer: &EncodedBuffer,
        pts_us: i64,
    ) -> Result<(), MuxerError>;

    /// Finalize the container after every track reached end-of-stream
    fn finish(&mut self) -> Result<(), MuxerError>;

    /// Drop everything written so far; used when the muxer never started
    fn discard(&mut self) -> Result<(), MuxerError>;
}

/// Options applied when the container is created
#[derive(Debug, Clone, Default)]
pub struct MuxerOptions {
    /// Reserve an audio track pad
    pub with_audio: bool,
    /// Playback rotation hint in degrees
    pub orientation_degrees: u32,
    /// Text stored as the container comment
    pub watermark: Option<String>,
    /// Fragment duration in milliseconds, 0 for a regular MP4
    pub fragment_duration_ms: u32,
}

/// Tag value for the rotation hint
pub fn orientation_tag(degrees: u32) -> Option<&'static str> {
    match degrees % 360 {
        90 => Some("rotate-90"),
        180 => Some("rotate-180"),
        270 => Some("rotate-270"),
        _ => None,
    }
}

const VIDEO_TRACK: usize = 0;
const AUDIO_TRACK: usize = 1;

/// `appsrc`(s) ! mp4mux ! filesink|fdsink
pub struct GstMuxer {
    pipeline: gst::Pipeline,
    video_src: AppSrc,
    audio_src: Option<AppSrc>,
    output_path: Option<PathBuf>,
    // Keeps the descriptor used by fdsink open
    _file: Option<std::fs::File>,
    started: bool,
    closed: bool,
}

impl GstMuxer {
    pub fn new(sink: OutputSink, options: &MuxerOptions) -> Result<Self, MuxerError> {
        gst::init().map_err(|e| MuxerError::Create(format!("GStreamer init failed: {}", e)))?;

        info!(output = %sink.describe(), audio = options.with_audio, "Creating muxer");

        let pipeline = gst::Pipeline::with_name("dualcam-muxer");

        let mux = gst::ElementFactory::make("mp4mux")
            .name("mux")
            .build()
            .map_err(|e| MuxerError::Create(format!("Failed to create mp4mux: {}", e)))?;

        if options.fragment_duration_ms > 0 && mux.has_property("fragment-duration") {
            mux.set_property("fragment-duration", options.fragment_duration_ms);
            debug!(
                fragment_ms = options.fragment_duration_ms,
                "Configured fragmented MP4 output"
            );
        }

        apply_tags(&mux, options);

        let (file_sink, output_path, file) = match sink {
            OutputSink::Path(path) => {
                let location = path
                    .to_str()
                    .ok_or_else(|| MuxerError::Create(format!("Invalid path: {}", path.display())))?
                    .to_string();
                let element = gst::ElementFactory::make("filesink")
                    .property("location", location)
                    .build()
                    .map_err(|e| MuxerError::Create(format!("Failed to create filesink: {}", e)))?;
                (element, Some(path), None)
            }
            OutputSink::File(file) => {
                use std::os::fd::AsRawFd;
                let element = gst::ElementFactory::make("fdsink")
                    .property("fd", file.as_raw_fd())
                    .build()
                    .map_err(|e| MuxerError::Create(format!("Failed to create fdsink: {}", e)))?;
                (element, None, Some(file))
            }
        };

        pipeline
            .add_many([&mux, &file_sink])
            .map_err(|e| MuxerError::Create(format!("Failed to add elements: {}", e)))?;
        mux.link(&file_sink)
            .map_err(|_| MuxerError::Create("Failed to link muxer to sink".into()))?;

        let video_src = add_track_source(&pipeline, &mux, "video")?;
        let audio_src = if options.with_audio {
            Some(add_track_source(&pipeline, &mux, "audio")?)
        } else {
            None
        };

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            output_path,
            _file: file,
            started: false,
            closed: false,
        })
    }

    fn source(&self, track: usize) -> Option<&AppSrc> {
        match track {
            VIDEO_TRACK => Some(&self.video_src),
            AUDIO_TRACK => self.audio_src.as_ref(),
            _ => None,
        }
    }

    fn sources(&self) -> impl Iterator<Item = &AppSrc> {
        std::iter::once(&self.video_src).chain(self.audio_src.iter())
    }

    fn shut_down(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(?e, "Failed to set muxer pipeline to Null");
        }
    }
}

fn add_track_source(
    pipeline: &gst::Pipeline,
    mux: &gst::Element,
    kind: &str,
) -> Result<AppSrc, MuxerError> {
    let src = AppSrc::builder()
        .name(format!("{}_src", kind))
        .format(gst::Format::Time)
        .is_live(false)
        .block(false)
        .max_bytes(0)
        .build();

    pipeline
        .add(&src)
        .map_err(|e| MuxerError::Create(format!("Failed to add {} source: {}", kind, e)))?;

    let mux_pad = mux
        .request_pad_simple(&format!("{}_%u", kind))
        .ok_or_else(|| MuxerError::Create(format!("mp4mux has no {} pad", kind)))?;
    let src_pad = src
        .static_pad("src")
        .ok_or_else(|| MuxerError::Create(format!("{} source has no pad", kind)))?;
    src_pad
        .link(&mux_pad)
        .map_err(|e| MuxerError::Create(format!("Failed to link {} track: {:?}", kind, e)))?;

    Ok(src)
}

fn apply_tags(mux: &gst::Element, options: &MuxerOptions) {
    let Some(setter) = mux.dynamic_cast_ref::<gst::TagSetter>() else {
        return;
    };
    if let Some(orientation) = orientation_tag(options.orientation_degrees) {
        setter.add_tag::<gst::tags::ImageOrientation>(&orientation, gst::TagMergeMode::Replace);
        debug!(orientation, "Added orientation tag");
    }
    if let Some(text) = options.watermark.as_deref().filter(|t| !t.is_empty()) {
        setter.add_tag::<gst::tags::Comment>(&text, gst::TagMergeMode::Replace);
        debug!("Added watermark comment");
    }
}

impl Muxer for GstMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
        let caps = gst::Caps::from_str(&format.caps)
            .map_err(|e| MuxerError::Track(format!("Invalid caps {}: {}", format.caps, e)))?;
        let index = match format.kind {
            TrackKind::Video => VIDEO_TRACK,
            TrackKind::Audio => AUDIO_TRACK,
        };
        let src = self
            .source(index)
            .ok_or_else(|| MuxerError::Track("No audio track reserved".into()))?;
        src.set_caps(Some(&caps));
        Ok(index)
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        if self.started {
            return Err(MuxerError::AlreadyStarted);
        }
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MuxerError::Create(format!("Failed to start muxer: {}", e)))?;
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        buffer: &EncodedBuffer,
        pts_us: i64,
    ) -> Result<(), MuxerError> {
        if !self.started {
            return Err(MuxerError::NotStarted);
        }
        let src = self
            .source(track)
            .ok_or_else(|| MuxerError::Write(format!("Unknown track {}", track)))?;

        let mut gst_buffer = gst::Buffer::from_slice(buffer.data.clone());
        {
            let buffer_ref = gst_buffer
                .get_mut()
                .ok_or_else(|| MuxerError::Write("Buffer not writable".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_useconds(pts_us.max(0) as u64));
            if track == VIDEO_TRACK && !buffer.flags.key_frame {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        src.push_buffer(gst_buffer)
            .map(|_| ())
            .map_err(|e| MuxerError::Write(format!("{:?}", e)))
    }

    fn finish(&mut self) -> Result<(), MuxerError> {
        if self.closed {
            return Ok(());
        }
        for src in self.sources() {
            if let Err(e) = src.end_of_stream() {
                warn!(?e, "Failed to send EOS to track source");
            }
        }

        let result = match self.pipeline.bus() {
            Some(bus) => {
                let msg = bus.timed_pop_filtered(
                    gst::ClockTime::from_mseconds(timing::MUXER_EOS_TIMEOUT_MS),
                    &[gst::MessageType::Eos, gst::MessageType::Error],
                );
                match msg.as_ref().map(|m| m.view()) {
                    Some(gst::MessageView::Eos(_)) => {
                        debug!("Muxer reached EOS");
                        Ok(())
                    }
                    Some(gst::MessageView::Error(err)) => {
                        Err(MuxerError::Finalize(err.error().to_string()))
                    }
                    _ => Err(MuxerError::Finalize("Timed out waiting for EOS".into())),
                }
            }
            None => Err(MuxerError::Finalize("Muxer pipeline has no bus".into())),
        };

        self.shut_down();
        if let Some(path) = &self.output_path {
            info!(path = %path.display(), "Container written");
        }
        result
    }

    fn discard(&mut self) -> Result<(), MuxerError> {
        self.shut_down();
        if let Some(path) = &self.output_path
            && path.exists()
        {
            std::fs::remove_file(path).map_err(|e| {
                MuxerError::Finalize(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), "Removed unstarted output");
        }
        Ok(())
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        self.shut_down();
    }
}
