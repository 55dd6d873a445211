// SPDX-License-Identifier: MPL-2.0

//! Audio encoder selection and the GStreamer audio encoder
//!
//! AAC is preferred since it is what MP4 players expect; Opus is kept as a
//! fallback for systems without an AAC encoder (mp4mux accepts both).

use crate::backends::audio::AudioFormat;
use crate::errors::EncoderError;
use crate::media::codec::{AudioEncoder, DequeueResult, Encoder, TrackKind};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppSinkOutput;

/// Audio codec types in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    AAC,
    Opus,
}

impl AudioCodec {
    /// Caps forced after the encoder
    pub fn caps_string(&self) -> &'static str {
        match self {
            AudioCodec::AAC => "audio/mpeg,mpegversion=4,stream-format=raw",
            AudioCodec::Opus => "audio/x-opus",
        }
    }

    pub fn parser_name(&self) -> Option<&'static str> {
        match self {
            AudioCodec::AAC => Some("aacparse"),
            AudioCodec::Opus => Some("opusparse"),
        }
    }
}

/// Selected audio encoder with configuration
pub struct SelectedAudioEncoder {
    pub encoder: gst::Element,
    pub element_name: &'static str,
    pub codec: AudioCodec,
}

const AAC_ENCODERS: [&str; 4] = ["avenc_aac", "fdkaacenc", "voaacenc", "faac"];

/// Select the best available audio encoder
///
/// Priority order:
/// 1. AAC (avenc_aac, fdkaacenc, voaacenc, faac)
/// 2. Opus (opusenc)
pub fn select_audio_encoder(bitrate_bps: u32) -> Result<SelectedAudioEncoder, EncoderError> {
    gst::init()
        .map_err(|e| EncoderError::Create(format!("Failed to initialize GStreamer: {}", e)))?;

    for element_name in AAC_ENCODERS {
        if let Ok(encoder) = gst::ElementFactory::make(element_name).build() {
            info!(codec = "AAC", encoder = %element_name, bitrate_bps, "Selected audio encoder");
            configure_aac_encoder(&encoder, element_name, bitrate_bps);
            return Ok(SelectedAudioEncoder {
                encoder,
                element_name,
                codec: AudioCodec::AAC,
            });
        }
    }

    if let Ok(encoder) = gst::ElementFactory::make("opusenc").build() {
        info!(codec = "Opus", bitrate_bps, "Selected audio encoder");
        if encoder.has_property("bitrate") {
            encoder.set_property("bitrate", bitrate_bps as i32);
        }
        return Ok(SelectedAudioEncoder {
            encoder,
            element_name: "opusenc",
            codec: AudioCodec::Opus,
        });
    }

    Err(EncoderError::Create(
        "No audio encoder available. Please install gstreamer1-libav (avenc_aac) \
         or gstreamer1-plugins-base (opusenc)"
            .to_string(),
    ))
}

fn configure_aac_encoder(encoder: &gst::Element, encoder_name: &str, bitrate_bps: u32) {
    if !encoder.has_property("bitrate") {
        return;
    }
    match encoder_name {
        // faac takes bits per second as i32, avenc_aac takes i64
        "avenc_aac" => encoder.set_property("bitrate", bitrate_bps as i64),
        "fdkaacenc" | "voaacenc" | "faac" => encoder.set_property("bitrate", bitrate_bps as i32),
        _ => debug!("Unknown AAC encoder type, using default configuration"),
    }
    debug!(encoder = encoder_name, bitrate_bps, "Configured AAC encoder");
}

/// `appsrc ! audioconvert ! <encoder> ! <parser> ! appsink`
pub struct GstAudioEncoder {
    name: String,
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    output: AppSinkOutput,
    released: bool,
}

impl GstAudioEncoder {
    pub fn new(format: AudioFormat, bitrate_bps: u32) -> Result<Self, EncoderError> {
        let selected = select_audio_encoder(bitrate_bps)?;

        let appsrc = AppSrc::builder()
            .name("pcm")
            .caps(
                &gst::Caps::builder("audio/x-raw")
                    .field("format", "S16LE")
                    .field("layout", "interleaved")
                    .field("rate", format.sample_rate as i32)
                    .field("channels", format.channels as i32)
                    .build(),
            )
            .format(gst::Format::Time)
            .is_live(false)
            .do_timestamp(false)
            .build();

        let convert = gst::ElementFactory::make("audioconvert")
            .build()
            .map_err(|e| EncoderError::Create(format!("Failed to create audioconvert: {}", e)))?;

        let parser = match selected.codec.parser_name() {
            Some(name) => match gst::ElementFactory::make(name).build() {
                Ok(parser) => Some(parser),
                Err(e) => {
                    warn!("Failed to create parser {}: {}", name, e);
                    None
                }
            },
            None => None,
        };

        let output_caps = selected
            .codec
            .caps_string()
            .parse::<gst::Caps>()
            .map_err(|e| EncoderError::Create(format!("Invalid caps: {}", e)))?;
        let caps_filter = gst::ElementFactory::make("capsfilter")
            .property("caps", &output_caps)
            .build()
            .map_err(|e| EncoderError::Create(format!("Failed to create capsfilter: {}", e)))?;

        let appsink = AppSink::builder().name("encoded").sync(false).build();

        let mut chain: Vec<&gst::Element> = vec![appsrc.upcast_ref(), &convert, &selected.encoder];
        if let Some(parser) = parser.as_ref() {
            chain.push(parser);
        }
        chain.push(&caps_filter);
        chain.push(appsink.upcast_ref());

        let pipeline = gst::Pipeline::with_name("dualcam-audio-encoder");
        pipeline
            .add_many(chain.iter().copied())
            .map_err(|e| EncoderError::Create(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(chain.iter().copied())
            .map_err(|e| EncoderError::Create(format!("Failed to link audio encoder: {}", e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Create(format!("Failed to start audio encoder: {}", e)))?;

        info!(
            encoder = selected.element_name,
            rate = format.sample_rate,
            channels = format.channels,
            "Audio encoder ready"
        );

        Ok(Self {
            name: selected.element_name.to_string(),
            pipeline,
            appsrc,
            output: AppSinkOutput::new(appsink, TrackKind::Audio),
            released: false,
        })
    }
}

impl Encoder for GstAudioEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<DequeueResult, EncoderError> {
        if self.released {
            return Err(EncoderError::Released);
        }
        self.output.dequeue(timeout)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), EncoderError> {
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| EncoderError::Input(format!("Failed to send EOS: {:?}", e)))
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| EncoderError::Output(format!("Failed to stop audio encoder: {}", e)))
    }
}

impl AudioEncoder for GstAudioEncoder {
    fn queue_input(&mut self, pcm: &[u8], pts_us: i64) -> Result<(), EncoderError> {
        if self.released {
            return Err(EncoderError::Released);
        }
        let mut buffer = gst::Buffer::from_slice(pcm.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_useconds(pts_us.max(0) as u64));
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| EncoderError::Input(format!("Failed to push audio: {:?}", e)))
    }
}

impl Drop for GstAudioEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release audio encoder on drop");
        }
    }
}
