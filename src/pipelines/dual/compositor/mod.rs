// SPDX-License-Identifier: GPL-3.0-only

//! Picture-in-picture compositor
//!
//! Pulls the latest frame from each source's [`FrameSlot`], uploads it to
//! the matching frame sink and draws the fixed recipe: full-screen source,
//! optional border, then the inset. Runs only on the render thread; the
//! control thread talks to it through [`CompositorControls`].

pub mod context;
pub mod wgpu_context;

pub use context::{CompositingContext, DrawCommand, SinkId};
pub use wgpu_context::WgpuCompositingContext;

use crate::backends::camera::{FrameSlot, IDENTITY_TRANSFORM};
use crate::constants::pip;
use crate::errors::CompositorError;
use crate::media::codec::InputSurface;
use crate::shaders::ProgramId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::geometry::Quad;
use super::layout::{Layout, LayoutCell, PipConfig};

/// Live reconfiguration handle shared with the control thread
#[derive(Debug, Clone)]
pub struct CompositorControls {
    swapped: Arc<AtomicBool>,
    layout: Arc<LayoutCell>,
}

impl CompositorControls {
    pub fn new(config: PipConfig, width: u32, height: u32) -> Self {
        Self {
            swapped: Arc::new(AtomicBool::new(false)),
            layout: Arc::new(LayoutCell::new(config, width, height)),
        }
    }

    /// Flip which source is full-screen, returns the new state
    pub fn swap(&self) -> bool {
        !self.swapped.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped.load(Ordering::Acquire)
    }

    /// Publish a new configuration for the next render pass
    pub fn update_config(&self, config: PipConfig) -> Arc<Layout> {
        let layout = self.layout.store(config);
        debug!(?config, "PiP layout updated");
        layout
    }

    pub fn current(&self) -> Arc<Layout> {
        self.layout.load()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.layout.dimensions()
    }
}

/// Draw list for one output frame
pub fn build_draw_list(
    layout: &Layout,
    full: SinkId,
    transforms: &[[f32; 16]; 2],
) -> Vec<DrawCommand> {
    let inset = full.other();
    let geometry = &layout.geometry;
    let mut commands = Vec::with_capacity(3);

    commands.push(DrawCommand {
        program: ProgramId::Textured,
        quad: Quad::FULL,
        source: Some(full),
        tex_transform: transforms[full.index()],
        color: [0.0; 4],
        size_px: (0.0, 0.0),
        radius_px: 0.0,
    });

    if let Some(border) = geometry.border {
        commands.push(DrawCommand {
            program: ProgramId::Border,
            quad: border,
            source: None,
            tex_transform: IDENTITY_TRANSFORM,
            color: pip::BORDER_COLOR,
            size_px: geometry.border_size_px,
            radius_px: geometry.border_radius_px,
        });
    }

    let program = if layout.config.rounded_corners {
        ProgramId::RoundedTextured
    } else {
        ProgramId::Textured
    };
    commands.push(DrawCommand {
        program,
        quad: geometry.pip,
        source: Some(inset),
        tex_transform: transforms[inset.index()],
        color: [0.0; 4],
        size_px: geometry.pip_size_px,
        radius_px: geometry.corner_radius_px,
    });

    commands
}

pub struct Compositor {
    ctx: Box<dyn CompositingContext>,
    slots: [Arc<FrameSlot>; 2],
    controls: CompositorControls,
    transforms: [[f32; 16]; 2],
    delivered: [bool; 2],
    released: bool,
}

impl Compositor {
    /// Bind `ctx` to the encoder surface and create both frame sinks
    pub fn new(
        mut ctx: Box<dyn CompositingContext>,
        surface: Arc<dyn InputSurface>,
        slots: [Arc<FrameSlot>; 2],
        controls: CompositorControls,
    ) -> Result<Self, CompositorError> {
        let (width, height) = surface.dimensions();
        ctx.bind(surface)?;
        for sink in SinkId::ALL {
            ctx.create_frame_sink(sink)?;
        }
        info!(width, height, "Compositor ready");

        Ok(Self {
            ctx,
            slots,
            controls,
            transforms: [IDENTITY_TRANSFORM; 2],
            delivered: [false; 2],
            released: false,
        })
    }

    pub fn controls(&self) -> &CompositorControls {
        &self.controls
    }

    /// Whether a source has delivered at least one frame
    pub fn has_delivered(&self, sink: SinkId) -> bool {
        self.delivered[sink.index()]
    }

    /// Run one render pass
    ///
    /// Returns `Ok(false)` without touching the GPU when neither source
    /// has a new frame.
    pub fn render_frame(&mut self) -> Result<bool, CompositorError> {
        if self.released {
            return Err(CompositorError::Released);
        }

        let frames = [self.slots[0].take(), self.slots[1].take()];
        if frames.iter().all(Option::is_none) {
            return Ok(false);
        }

        for sink in SinkId::ALL {
            if let Some(frame) = &frames[sink.index()] {
                self.ctx.upload(sink, frame)?;
                self.transforms[sink.index()] = frame.transform;
                self.delivered[sink.index()] = true;
            }
        }

        let layout = self.controls.current();
        let full = if self.controls.is_swapped() {
            SinkId::Secondary
        } else {
            SinkId::Primary
        };

        let commands = build_draw_list(&layout, full, &self.transforms);
        self.ctx.render_pass(&commands)?;
        self.ctx.present()?;
        Ok(true)
    }

    /// Free the GPU context; a second call is a no-op
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.ctx.release();
        debug!("Compositor released");
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        if !self.released {
            warn!("Compositor dropped without release");
            self.release();
        }
    }
}
