// SPDX-License-Identifier: GPL-3.0-only

//! PiP configuration value object and its atomically swapped holder

use crate::constants::pip;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::geometry::{PipGeometry, compute_geometry};

/// Which physical camera is full-screen when recording starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    #[default]
    Back,
    Front,
}

impl CameraFacing {
    pub fn opposite(self) -> Self {
        match self {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        }
    }
}

/// Corner the inset is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl PipPosition {
    pub const ALL: [PipPosition; 4] = [
        PipPosition::TopLeft,
        PipPosition::TopRight,
        PipPosition::BottomLeft,
        PipPosition::BottomRight,
    ];

    pub fn is_left(self) -> bool {
        matches!(self, PipPosition::TopLeft | PipPosition::BottomLeft)
    }

    pub fn is_top(self) -> bool {
        matches!(self, PipPosition::TopLeft | PipPosition::TopRight)
    }
}

/// Inset size presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl PipSize {
    pub const ALL: [PipSize; 3] = [PipSize::Small, PipSize::Medium, PipSize::Large];

    /// Fraction of the output width covered by the inset
    pub fn ratio(self) -> f32 {
        match self {
            PipSize::Small => 0.20,
            PipSize::Medium => 0.28,
            PipSize::Large => 0.40,
        }
    }
}

/// Immutable PiP layout description
///
/// Updates build a new value with the `with_*` helpers and hand it to
/// [`LayoutCell::store`]; nothing mutates a published config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipConfig {
    pub primary: CameraFacing,
    pub position: PipPosition,
    pub size: PipSize,
    pub margin_dp: u32,
    pub show_border: bool,
    pub rounded_corners: bool,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            primary: CameraFacing::Back,
            position: PipPosition::BottomRight,
            size: PipSize::Medium,
            margin_dp: pip::DEFAULT_MARGIN_DP,
            show_border: true,
            rounded_corners: true,
        }
    }
}

impl PipConfig {
    pub fn with_primary(self, primary: CameraFacing) -> Self {
        Self { primary, ..self }
    }

    pub fn with_position(self, position: PipPosition) -> Self {
        Self { position, ..self }
    }

    pub fn with_size(self, size: PipSize) -> Self {
        Self { size, ..self }
    }

    pub fn with_margin_dp(self, margin_dp: u32) -> Self {
        Self { margin_dp, ..self }
    }

    pub fn with_border(self, show_border: bool) -> Self {
        Self {
            show_border,
            ..self
        }
    }

    pub fn with_rounded_corners(self, rounded_corners: bool) -> Self {
        Self {
            rounded_corners,
            ..self
        }
    }

    /// Configuration with the primary selection flipped
    pub fn swapped(self) -> Self {
        self.with_primary(self.primary.opposite())
    }
}

/// A configuration together with the geometry derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub config: PipConfig,
    pub geometry: PipGeometry,
}

impl Layout {
    pub fn new(config: PipConfig, width: u32, height: u32) -> Self {
        Self {
            geometry: compute_geometry(&config, width, height),
            config,
        }
    }
}

/// Shared holder for the current layout
///
/// Readers clone the inner `Arc` under a short read lock, so a render pass
/// works on one complete snapshot (config and geometry together) even if a
/// new layout is stored while it draws.
#[derive(Debug)]
pub struct LayoutCell {
    current: RwLock<Arc<Layout>>,
    width: u32,
    height: u32,
}

impl LayoutCell {
    pub fn new(config: PipConfig, width: u32, height: u32) -> Self {
        Self {
            current: RwLock::new(Arc::new(Layout::new(config, width, height))),
            width,
            height,
        }
    }

    pub fn load(&self) -> Arc<Layout> {
        Arc::clone(&self.current.read())
    }

    /// Replace the layout; geometry is computed before the swap
    pub fn store(&self, config: PipConfig) -> Arc<Layout> {
        let layout = Arc::new(Layout::new(config, self.width, self.height));
        *self.current.write() = Arc::clone(&layout);
        layout
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
