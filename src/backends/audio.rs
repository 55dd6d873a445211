// SPDX-License-Identifier: MPL-2.0

//! Microphone capture
//!
//! Devices are discovered from `pw-dump`; capture runs a small GStreamer
//! pipeline ending in an appsink that delivers interleaved S16LE PCM.

use crate::errors::PipelineError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use serde_json::Value;
use std::process::Command;
use tracing::{debug, info, warn};

/// An audio input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    pub serial: String,
    pub node_name: String,
    pub is_default: bool,
}

/// Enumerate audio sources, default device first
pub fn enumerate_audio_devices() -> Vec<AudioDevice> {
    let output = match Command::new("pw-dump").output() {
        Ok(output) if output.status.success() => output,
        Ok(_) => {
            warn!("pw-dump command failed");
            return Vec::new();
        }
        Err(e) => {
            warn!("Failed to run pw-dump: {}", e);
            return Vec::new();
        }
    };

    match std::str::from_utf8(&output.stdout) {
        Ok(json) => parse_pw_dump(json),
        Err(e) => {
            warn!("Failed to parse pw-dump output: {}", e);
            Vec::new()
        }
    }
}

fn str_prop<'a>(props: &'a Value, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

fn default_source_name(nodes: &[Value]) -> Option<String> {
    nodes
        .iter()
        .filter(|n| str_prop(n, "type") == Some("PipeWire:Interface:Metadata"))
        .filter(|n| {
            n.get("props")
                .and_then(|p| str_prop(p, "metadata.name"))
                .is_some_and(|name| name == "default")
        })
        .flat_map(|n| n.get("metadata").and_then(Value::as_array).into_iter().flatten())
        .find(|entry| {
            matches!(
                str_prop(entry, "key"),
                Some("default.audio.source") | Some("default.configured.audio.source")
            )
        })
        .and_then(|entry| entry.get("value"))
        .and_then(|value| str_prop(value, "name"))
        .map(str::to_string)
}

/// Extract `Audio/Source` nodes from `pw-dump` JSON
pub fn parse_pw_dump(json: &str) -> Vec<AudioDevice> {
    let nodes: Vec<Value> = match serde_json::from_str(json) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("Failed to parse JSON from pw-dump: {}", e);
            return Vec::new();
        }
    };

    let default_name = default_source_name(&nodes);

    let mut devices: Vec<AudioDevice> = nodes
        .iter()
        .filter_map(|node| node.get("info")?.get("props"))
        .filter(|props| str_prop(props, "media.class") == Some("Audio/Source"))
        .map(|props| {
            let node_name = str_prop(props, "node.name").unwrap_or("").to_string();
            let serial = match props.get("object.serial") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => "0".to_string(),
            };
            AudioDevice {
                name: str_prop(props, "node.nick")
                    .or_else(|| str_prop(props, "node.description"))
                    .unwrap_or(if node_name.is_empty() {
                        "Unknown Audio Device"
                    } else {
                        &node_name
                    })
                    .to_string(),
                serial,
                is_default: default_name.as_deref() == Some(node_name.as_str()),
                node_name,
            }
        })
        .collect();

    for device in &devices {
        debug!(
            name = %device.name,
            serial = %device.serial,
            is_default = device.is_default,
            "Found audio input device"
        );
    }

    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
    devices
}

/// PCM layout delivered by an [`AudioCapture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioFormat {
    /// Bytes per second of interleaved S16LE
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * 2
    }
}

/// Source of raw microphone samples, owned by the audio thread
pub trait AudioCapture: Send {
    fn format(&self) -> AudioFormat;

    fn start(&mut self) -> Result<(), PipelineError>;

    /// Stop delivering samples but keep the device open
    fn pause(&mut self) -> Result<(), PipelineError>;

    /// Copy available samples into `buf`, returns the byte count (may be 0)
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PipelineError>;

    fn release(&mut self);
}

/// GStreamer microphone capture
pub struct GstAudioCapture {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    format: AudioFormat,
    pending: Vec<u8>,
    released: bool,
}

impl GstAudioCapture {
    /// Open `device` (a PipeWire serial) or the default source
    pub fn new(device: Option<&str>, format: AudioFormat) -> Result<Self, PipelineError> {
        gst::init().map_err(|e| PipelineError::Audio(format!("GStreamer init failed: {}", e)))?;

        let source = match device {
            Some(serial) if gst::ElementFactory::find("pipewiresrc").is_some() => {
                format!("pipewiresrc target-object={} do-timestamp=true", serial)
            }
            _ => "autoaudiosrc".to_string(),
        };

        let description = format!(
            "{} ! audioconvert ! audioresample ! \
             audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! \
             appsink name=sink sync=false max-buffers=32 drop=false",
            source, format.sample_rate, format.channels
        );
        info!(pipeline = %description, "Creating audio capture pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| PipelineError::Audio(format!("Failed to build audio pipeline: {}", e)))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| PipelineError::Audio("Audio pipeline is not a Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| PipelineError::Audio("Failed to get audio appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| PipelineError::Audio("Failed to cast audio appsink".into()))?;

        Ok(Self {
            pipeline,
            appsink,
            format,
            pending: Vec::new(),
            released: false,
        })
    }
}

impl AudioCapture for GstAudioCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| PipelineError::Audio(format!("Failed to start audio capture: {}", e)))?;
        debug!("Audio capture playing");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PipelineError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| PipelineError::Audio(format!("Failed to pause audio capture: {}", e)))?;
        debug!("Audio capture paused");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PipelineError> {
        if self.pending.is_empty() {
            if self.appsink.is_eos() {
                return Err(PipelineError::Audio("Audio source reached end of stream".into()));
            }
            if let Some(sample) = self
                .appsink
                .try_pull_sample(gst::ClockTime::from_mseconds(20))
            {
                let buffer = sample
                    .buffer()
                    .ok_or_else(|| PipelineError::Audio("Audio sample without buffer".into()))?;
                let map = buffer
                    .map_readable()
                    .map_err(|e| PipelineError::Audio(format!("Failed to map audio: {}", e)))?;
                self.pending.extend_from_slice(map.as_slice());
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(?e, "Failed to stop audio capture");
        }
        self.pending.clear();
    }
}

impl Drop for GstAudioCapture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"[
        {"type": "PipeWire:Interface:Metadata", "props": {"metadata.name": "default"},
         "metadata": [{"key": "default.audio.source", "value": {"name": "mic.usb"}}]},
        {"type": "PipeWire:Interface:Node", "info": {"props": {
            "media.class": "Audio/Source", "node.name": "mic.internal",
            "node.description": "Internal Mic", "object.serial": 41}}},
        {"type": "PipeWire:Interface:Node", "info": {"props": {
            "media.class": "Audio/Source", "node.name": "mic.usb",
            "node.nick": "USB Mic", "object.serial": "57"}}},
        {"type": "PipeWire:Interface:Node", "info": {"props": {
            "media.class": "Video/Source", "node.name": "cam"}}}
    ]"#;

    #[test]
    fn test_parse_pw_dump_orders_default_first() {
        let devices = parse_pw_dump(DUMP);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "USB Mic");
        assert!(devices[0].is_default);
        assert_eq!(devices[0].serial, "57");
        assert_eq!(devices[1].serial, "41");
        assert!(!devices[1].is_default);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_pw_dump("not json").is_empty());
    }

    #[test]
    fn test_byte_rate() {
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
        };
        assert_eq!(format.byte_rate(), 88_200);
    }
}
