// SPDX-License-Identifier: GPL-3.0-only

//! Compositing context interface
//!
//! Everything the render pass needs from a GPU backend. Implementations
//! live on the render thread and own every GPU object they create.

use crate::backends::camera::CameraFrame;
use crate::errors::CompositorError;
use crate::media::codec::InputSurface;
use crate::shaders::ProgramId;
use std::sync::Arc;

use super::super::geometry::Quad;

/// Which physical source a frame sink belongs to
///
/// Named after the role the source had when recording started; the swap
/// flag decides which sink is drawn full-screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkId {
    Primary,
    Secondary,
}

impl SinkId {
    pub const ALL: [SinkId; 2] = [SinkId::Primary, SinkId::Secondary];

    pub fn index(self) -> usize {
        match self {
            SinkId::Primary => 0,
            SinkId::Secondary => 1,
        }
    }

    pub fn other(self) -> SinkId {
        match self {
            SinkId::Primary => SinkId::Secondary,
            SinkId::Secondary => SinkId::Primary,
        }
    }
}

/// One quad drawn with one program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub program: ProgramId,
    pub quad: Quad,
    /// Sampled sink, `None` for solid programs
    pub source: Option<SinkId>,
    /// Column-major texture transform of the source
    pub tex_transform: [f32; 16],
    pub color: [f32; 4],
    /// Quad size in output pixels
    pub size_px: (f32, f32),
    /// Corner radius in output pixels, 0 for square corners
    pub radius_px: f32,
}

pub trait CompositingContext: Send {
    /// Attach the encoder input that presented frames go to
    fn bind(&mut self, surface: Arc<dyn InputSurface>) -> Result<(), CompositorError>;

    /// Create the texture-backed sink for one source
    fn create_frame_sink(&mut self, sink: SinkId) -> Result<(), CompositorError>;

    /// Copy the latest frame of a source into its sink
    fn upload(&mut self, sink: SinkId, frame: &CameraFrame) -> Result<(), CompositorError>;

    /// Clear the target and draw `commands` in order
    fn render_pass(&mut self, commands: &[DrawCommand]) -> Result<(), CompositorError>;

    /// Hand the rendered target to the bound surface
    fn present(&mut self) -> Result<(), CompositorError>;

    /// Free all GPU objects; a second call is a no-op
    fn release(&mut self);
}
