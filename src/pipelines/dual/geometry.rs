// SPDX-License-Identifier: GPL-3.0-only

//! PiP quad placement in normalized device coordinates
//!
//! NDC spans -1..1 on both axes with +y pointing up. Distances given in dp
//! are converted with one dp = `min(width, height) / 360` output pixels.

use crate::constants::pip;

use super::layout::PipConfig;

/// Axis-aligned rectangle in NDC
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl Quad {
    /// The full viewport
    pub const FULL: Quad = Quad {
        left: -1.0,
        bottom: -1.0,
        right: 1.0,
        top: 1.0,
    };

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    /// Grow by `dx`/`dy` on every side
    pub fn expanded(&self, dx: f32, dy: f32) -> Quad {
        Quad {
            left: self.left - dx,
            bottom: self.bottom - dy,
            right: self.right + dx,
            top: self.top + dy,
        }
    }

    pub fn contains(&self, other: &Quad) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.bottom >= self.bottom
            && other.top <= self.top
    }

    /// Size of the quad in output pixels
    pub fn size_px(&self, width: u32, height: u32) -> (f32, f32) {
        (
            self.width() * 0.5 * width as f32,
            self.height() * 0.5 * height as f32,
        )
    }
}

/// Everything the render pass needs to place the inset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipGeometry {
    pub pip: Quad,
    /// Present only when the border is enabled
    pub border: Option<Quad>,
    /// Inset size in output pixels, used by the rounded-corner test
    pub pip_size_px: (f32, f32),
    /// Zero when rounded corners are disabled
    pub corner_radius_px: f32,
    /// Border size in output pixels
    pub border_size_px: (f32, f32),
    pub border_radius_px: f32,
}

fn dp_to_px(dp: f32, width: u32, height: u32) -> f32 {
    dp * width.min(height) as f32 / pip::REFERENCE_DP
}

/// Compute inset and border quads for an output of `width`x`height`
pub fn compute_geometry(config: &PipConfig, width: u32, height: u32) -> PipGeometry {
    let width = width.max(1);
    let height = height.max(1);
    let (w, h) = (width as f32, height as f32);

    // Same fraction on both axes keeps the inset at the output aspect ratio
    let ratio = config.size.ratio();
    let pip_w = ratio * 2.0;
    let pip_h = ratio * 2.0;

    let margin_px = dp_to_px(config.margin_dp as f32, width, height);
    let margin_x = margin_px / w * 2.0;
    let margin_y = margin_px / h * 2.0;

    let left = if config.position.is_left() {
        -1.0 + margin_x
    } else {
        1.0 - margin_x - pip_w
    };
    let bottom = if config.position.is_top() {
        1.0 - margin_y - pip_h
    } else {
        -1.0 + margin_y
    };

    // An oversized margin must not push the inset off the canvas
    let left = left.clamp(-1.0, 1.0 - pip_w);
    let bottom = bottom.clamp(-1.0, 1.0 - pip_h);

    let quad = Quad {
        left,
        bottom,
        right: left + pip_w,
        top: bottom + pip_h,
    };

    let pip_size_px = quad.size_px(width, height);
    let corner_radius_px = if config.rounded_corners {
        pip::CORNER_RADIUS * pip_size_px.0.min(pip_size_px.1)
    } else {
        0.0
    };

    let stroke_px = dp_to_px(pip::BORDER_STROKE_DP, width, height);
    let border = config
        .show_border
        .then(|| quad.expanded(stroke_px / w * 2.0, stroke_px / h * 2.0));
    let border_size_px = border
        .map(|b| b.size_px(width, height))
        .unwrap_or((0.0, 0.0));
    let border_radius_px = if config.rounded_corners && border.is_some() {
        corner_radius_px + stroke_px
    } else {
        0.0
    };

    PipGeometry {
        pip: quad,
        border,
        pip_size_px,
        corner_radius_px,
        border_size_px,
        border_radius_px,
    }
}

/// Whether a point inside the inset (in pixels from its bottom-left corner)
/// survives the rounded-corner test
pub fn inside_rounded_rect(x: f32, y: f32, size: (f32, f32), radius: f32) -> bool {
    if radius <= 0.0 {
        return true;
    }
    let half_w = size.0 * 0.5;
    let half_h = size.1 * 0.5;
    let dx = (x - half_w).abs() - (half_w - radius);
    let dy = (y - half_h).abs() - (half_h - radius);
    if dx > 0.0 && dy > 0.0 {
        dx * dx + dy * dy <= radius * radius
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::dual::layout::{PipPosition, PipSize};

    const EPS: f32 = 1e-4;

    #[test]
    fn test_bottom_right_medium_1080p() {
        let config = PipConfig::default()
            .with_size(PipSize::Medium)
            .with_position(PipPosition::BottomRight);
        let geom = compute_geometry(&config, 1920, 1080);

        // 12 dp at 1080 short edge = 36 px
        let margin_x = 36.0 / 1920.0 * 2.0;
        let margin_y = 36.0 / 1080.0 * 2.0;
        assert!((geom.pip.right - (1.0 - margin_x)).abs() < EPS);
        assert!((geom.pip.bottom - (-1.0 + margin_y)).abs() < EPS);
        assert!((geom.pip.width() - 0.56).abs() < EPS);

        let (pw, ph) = geom.pip_size_px;
        assert!((pw - 537.6).abs() < 0.01);
        assert!((ph - 302.4).abs() < 0.01);
        assert!((pw / ph - 1920.0 / 1080.0).abs() < 1e-3);
    }

    #[test]
    fn test_each_corner_anchor() {
        for position in PipPosition::ALL {
            let geom = compute_geometry(&PipConfig::default().with_position(position), 1280, 720);
            assert!(Quad::FULL.contains(&geom.pip));
            assert_eq!(geom.pip.left < 0.0, position.is_left());
            assert_eq!(geom.pip.bottom > 0.0, position.is_top());
        }
    }

    #[test]
    fn test_border_expands_pip() {
        let geom = compute_geometry(&PipConfig::default(), 1920, 1080);
        let border = geom.border.unwrap();
        assert!(border.contains(&geom.pip));
        // 3 dp = 9 px at 1080p
        assert!((border.right - geom.pip.right - 9.0 / 1920.0 * 2.0).abs() < EPS);

        let geom = compute_geometry(&PipConfig::default().with_border(false), 1920, 1080);
        assert!(geom.border.is_none());
        assert_eq!(geom.border_radius_px, 0.0);
    }

    #[test]
    fn test_rounded_radius() {
        let geom = compute_geometry(&PipConfig::default(), 1920, 1080);
        assert!((geom.corner_radius_px - 0.08 * 302.4).abs() < 0.01);

        let square =
            compute_geometry(&PipConfig::default().with_rounded_corners(false), 1920, 1080);
        assert_eq!(square.corner_radius_px, 0.0);
    }

    #[test]
    fn test_huge_margin_is_clamped() {
        let config = PipConfig::default()
            .with_size(PipSize::Large)
            .with_margin_dp(5000);
        let geom = compute_geometry(&config, 640, 480);
        assert!(Quad::FULL.contains(&geom.pip));
    }

    #[test]
    fn test_inside_rounded_rect() {
        let size = (100.0, 50.0);
        assert!(inside_rounded_rect(50.0, 25.0, size, 10.0));
        assert!(!inside_rounded_rect(0.5, 0.5, size, 10.0));
        assert!(inside_rounded_rect(0.5, 25.0, size, 10.0));
        assert!(inside_rounded_rect(0.5, 0.5, size, 0.0));
    }
}
