// SPDX-License-Identifier: GPL-3.0-only

//! Factory for the media objects a recording needs
//!
//! The pipeline never names a concrete encoder, muxer or GPU type; it asks
//! a [`MediaBackend`]. Tests plug in in-memory fakes here.

use crate::backends::audio::{AudioCapture, AudioFormat, GstAudioCapture};
use crate::errors::{CompositorError, EncoderError, MuxerError, PipelineError};
use crate::media::codec::{AudioEncoder, VideoEncoder};
use crate::media::encoders::{GstAudioEncoder, GstVideoEncoder, VideoEncoderSettings};

use super::compositor::{CompositingContext, WgpuCompositingContext};
use super::events::OutputSink;
use super::muxer::{GstMuxer, Muxer, MuxerOptions};

pub trait MediaBackend: Send + Sync {
    fn create_video_encoder(
        &self,
        settings: &VideoEncoderSettings,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError>;

    fn create_audio_encoder(
        &self,
        format: AudioFormat,
        bitrate_bps: u32,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError>;

    fn create_audio_capture(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioCapture>, PipelineError>;

    fn create_muxer(
        &self,
        sink: OutputSink,
        options: &MuxerOptions,
    ) -> Result<Box<dyn Muxer>, MuxerError>;

    /// Called on the render thread, which then owns the context
    fn create_compositing_context(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn CompositingContext>, CompositorError>;
}

/// GStreamer encoders and muxer with a wgpu compositor
#[derive(Debug, Default, Clone, Copy)]
pub struct GstMediaBackend;

impl MediaBackend for GstMediaBackend {
    fn create_video_encoder(
        &self,
        settings: &VideoEncoderSettings,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        Ok(Box::new(GstVideoEncoder::new(settings)?))
    }

    fn create_audio_encoder(
        &self,
        format: AudioFormat,
        bitrate_bps: u32,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        Ok(Box::new(GstAudioEncoder::new(format, bitrate_bps)?))
    }

    fn create_audio_capture(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioCapture>, PipelineError> {
        Ok(Box::new(GstAudioCapture::new(device, format)?))
    }

    fn create_muxer(
        &self,
        sink: OutputSink,
        options: &MuxerOptions,
    ) -> Result<Box<dyn Muxer>, MuxerError> {
        Ok(Box::new(GstMuxer::new(sink, options)?))
    }

    fn create_compositing_context(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn CompositingContext>, CompositorError> {
        Ok(Box::new(WgpuCompositingContext::new(width, height)?))
    }
}
