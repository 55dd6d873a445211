// SPDX-License-Identifier: MPL-2.0

//! Recording pipelines
//!
//! Capture, compositing and encoding all run off the caller's thread: the
//! orchestrator has its own thread and the render and audio loops each
//! run on a dedicated worker, so commands return as soon as they are
//! accepted.

pub mod dual;
