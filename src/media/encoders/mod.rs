// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder selection and the push/pull adapters built on it
//!
//! Every encoder runs as `appsrc ! ... ! <encoder> ! <parser> ! appsink`.
//! Input is pushed into the appsrc; [`AppSinkOutput`] turns the appsink
//! into the dequeue side of [`Encoder`](super::codec::Encoder).

pub mod audio;
pub mod detection;
pub mod video;

pub use audio::{AudioCodec, GstAudioEncoder, select_audio_encoder};
pub use detection::{detect_audio_encoders, detect_video_encoders, log_available_encoders};
pub use video::{
    EncoderInfo, GstVideoEncoder, VideoCodec, VideoEncoderSettings, enumerate_video_encoders,
};

use super::codec::{BufferFlags, DequeueResult, EncodedBuffer, TrackFormat, TrackKind};
use crate::errors::EncoderError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use std::time::Duration;
use tracing::debug;

/// Output side of a GStreamer encoder pipeline
pub(crate) struct AppSinkOutput {
    appsink: AppSink,
    kind: TrackKind,
    announced: bool,
    pending: Option<EncodedBuffer>,
    eos_reported: bool,
}

impl AppSinkOutput {
    pub(crate) fn new(appsink: AppSink, kind: TrackKind) -> Self {
        Self {
            appsink,
            kind,
            announced: false,
            pending: None,
            eos_reported: false,
        }
    }

    /// One dequeue step: format first, then buffers, then a final EOS marker
    pub(crate) fn dequeue(&mut self, timeout: Duration) -> Result<DequeueResult, EncoderError> {
        if self.announced
            && let Some(buffer) = self.pending.take()
        {
            return Ok(DequeueResult::Buffer(buffer));
        }

        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_useconds(timeout.as_micros() as u64));

        let Some(sample) = sample else {
            if self.appsink.is_eos() && !self.eos_reported {
                self.eos_reported = true;
                debug!(kind = %self.kind, "Encoder output reached end of stream");
                return Ok(DequeueResult::Buffer(EncodedBuffer {
                    data: Vec::new(),
                    pts_us: 0,
                    flags: BufferFlags {
                        end_of_stream: true,
                        ..BufferFlags::default()
                    },
                }));
            }
            return Ok(DequeueResult::TryAgainLater);
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| EncoderError::Output("Sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| EncoderError::Output(format!("Failed to map buffer: {}", e)))?;

        let encoded = EncodedBuffer {
            data: map.as_slice().to_vec(),
            pts_us: buffer.pts().map(|t| t.useconds() as i64).unwrap_or(0),
            flags: BufferFlags {
                codec_config: buffer.flags().contains(gst::BufferFlags::HEADER),
                key_frame: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
                end_of_stream: false,
            },
        };

        if !self.announced {
            let caps = sample
                .caps()
                .ok_or_else(|| EncoderError::Output("Sample without caps".into()))?;
            self.announced = true;
            self.pending = Some(encoded);
            let format = TrackFormat {
                kind: self.kind,
                caps: caps.to_string(),
            };
            debug!(kind = %self.kind, caps = %format.caps, "Encoder output format known");
            return Ok(DequeueResult::FormatChanged(format));
        }

        Ok(DequeueResult::Buffer(encoded))
    }
}
