// SPDX-License-Identifier: GPL-3.0-only
//! Named, versioned rendering programs
//!
//! The compositor asks for programs by [`ProgramId`]; a compositing
//! backend maps each id to whatever it runs natively. The wgpu backend
//! uses the WGSL entry points listed here, all compiled from one module.

/// WGSL source shared by every compositor program
pub const COMPOSITOR_SHADER: &str = include_str!("compositor.wgsl");

/// Vertex entry point shared by all programs
pub const VERTEX_ENTRY: &str = "vs_main";

/// One of the fixed compositing programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramId {
    /// Texture drawn into a rectangle
    Textured,
    /// Texture clipped to a rounded rectangle
    RoundedTextured,
    /// Solid colour, optionally rounded
    Border,
}

impl ProgramId {
    pub const ALL: [ProgramId; 3] = [
        ProgramId::Textured,
        ProgramId::RoundedTextured,
        ProgramId::Border,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProgramId::Textured => "textured",
            ProgramId::RoundedTextured => "textured_rounded",
            ProgramId::Border => "border",
        }
    }

    pub fn version(&self) -> u32 {
        1
    }

    /// `name@version`, as used in logs and backend lookups
    pub fn key(&self) -> String {
        format!("{}@{}", self.name(), self.version())
    }

    pub fn fragment_entry(&self) -> &'static str {
        match self {
            ProgramId::Textured => "fs_textured",
            ProgramId::RoundedTextured => "fs_rounded",
            ProgramId::Border => "fs_border",
        }
    }

    /// Whether the program samples a source texture
    pub fn samples_texture(&self) -> bool {
        !matches!(self, ProgramId::Border)
    }
}

/// Uniform block matching `DrawParams` in the WGSL module
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawParams {
    /// left, bottom, right, top in NDC
    pub rect: [f32; 4],
    /// Column-major texture transform
    pub tex_transform: [[f32; 4]; 4],
    pub color: [f32; 4],
    /// width px, height px, corner radius px, unused
    pub shape: [f32; 4],
}

impl DrawParams {
    pub fn transform_from_slice(m: &[f32; 16]) -> [[f32; 4]; 4] {
        [
            [m[0], m[1], m[2], m[3]],
            [m[4], m[5], m[6], m[7]],
            [m[8], m[9], m[10], m[11]],
            [m[12], m[13], m[14], m[15]],
        ]
    }
}
