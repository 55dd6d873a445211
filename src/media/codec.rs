// SPDX-License-Identifier: MPL-2.0

//! Push/pull encoder abstraction
//!
//! Raw input goes in (an RGBA frame through an [`InputSurface`], or PCM
//! through [`AudioEncoder::queue_input`]); encoded output is pulled with
//! [`Encoder::dequeue_output`]. The drain loop only ever talks to these
//! traits, which lets it run against in-memory encoders in tests.

use crate::errors::EncoderError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Output format announced by an encoder before its first payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub kind: TrackKind,
    /// Container caps, e.g. `video/x-h264,stream-format=avc,alignment=au,...`
    pub caps: String,
}

impl TrackFormat {
    pub fn video(caps: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Video,
            caps: caps.into(),
        }
    }

    pub fn audio(caps: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Audio,
            caps: caps.into(),
        }
    }
}

/// Flags attached to an encoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags {
    /// Header data only, never written as a sample
    pub codec_config: bool,
    pub key_frame: bool,
    /// Last buffer the encoder will produce
    pub end_of_stream: bool,
}

/// One encoded access unit
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedBuffer {
    pub data: Vec<u8>,
    /// Timestamp assigned by the encoder, microseconds
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl EncodedBuffer {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for EncodedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedBuffer")
            .field("len", &self.data.len())
            .field("pts_us", &self.pts_us)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Result of one dequeue attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueResult {
    /// Nothing ready within the timeout
    TryAgainLater,
    /// The output format is now known
    FormatChanged(TrackFormat),
    Buffer(EncodedBuffer),
}

/// Common output side of an encoder
pub trait Encoder: Send {
    fn name(&self) -> &str;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<DequeueResult, EncoderError>;

    /// No more input will follow
    fn signal_end_of_stream(&mut self) -> Result<(), EncoderError>;

    /// Stop and free the encoder; a second call is a no-op
    fn release(&mut self) -> Result<(), EncoderError>;
}

/// Composited RGBA frame handed to the video encoder
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows
    pub data: Vec<u8>,
}

/// The video encoder's input target
pub trait InputSurface: Send + Sync {
    fn dimensions(&self) -> (u32, u32);

    fn submit(&self, frame: RenderedFrame) -> Result<(), EncoderError>;
}

pub trait VideoEncoder: Encoder {
    fn input_surface(&self) -> Arc<dyn InputSurface>;
}

pub trait AudioEncoder: Encoder {
    /// Queue interleaved S16LE samples stamped with `pts_us`
    fn queue_input(&mut self, pcm: &[u8], pts_us: i64) -> Result<(), EncoderError>;
}
