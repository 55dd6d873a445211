// SPDX-License-Identifier: MPL-2.0

//! Device adapters feeding the recorder
//!
//! ```text
//!   DualCameraRecorder
//!      │            │
//!      ▼            ▼
//!   camera        audio
//!   (provider +   (microphone list,
//!    handles)      PCM capture)
//!      │            │
//!      └─ PipeWire ─┘
//! ```
//!
//! - [`audio`]: Microphone enumeration and PCM capture
//! - [`camera`]: Camera provider/handle traits and the PipeWire provider

pub mod audio;
pub mod camera;
