// SPDX-License-Identifier: MPL-2.0

//! Media encoding for the composited recording
//!
//! - [`codec`]: push/pull encoder traits shared by every backend
//! - [`encoders`]: GStreamer video/audio encoders, element selection and
//!   detection

pub mod codec;
pub mod encoders;

pub use codec::{
    AudioEncoder, BufferFlags, DequeueResult, EncodedBuffer, Encoder, InputSurface, RenderedFrame,
    TrackFormat, TrackKind, VideoEncoder,
};
