//! Sizes, gradient axes and scale factors.
//!
//! Everything here is pure arithmetic: no surfaces, no fonts.

use serde::{Deserialize, Serialize};

/// A 2D size in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SizePx {
    pub width: u32,
    pub height: u32,
}

impl SizePx {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn diagonal(&self) -> f32 {
        (self.width as f32).hypot(self.height as f32)
    }
}

/// The reference resolution the preview renders at unless configured otherwise.
pub const DEFAULT_REFERENCE_SIZE: SizePx = SizePx {
    width: 1920,
    height: 1080,
};

// ============================================================================
// Gradient geometry
// ============================================================================

/// Legacy named gradient directions.
///
/// Kept for styles written before gradients used an angle. Each name maps to
/// literal edge or corner coordinates rather than a diagonal-length axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradientDirection {
    #[serde(rename = "to right")]
    ToRight,
    #[serde(rename = "to left")]
    ToLeft,
    #[serde(rename = "to bottom")]
    ToBottom,
    #[serde(rename = "to top")]
    ToTop,
    #[serde(rename = "to bottom right")]
    ToBottomRight,
    #[serde(rename = "to bottom left")]
    ToBottomLeft,
    #[serde(rename = "to top right")]
    ToTopRight,
    #[serde(rename = "to top left")]
    ToTopLeft,
}

impl GradientDirection {
    /// Parses a CSS-style direction name such as `"to bottom right"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "to right" => Some(Self::ToRight),
            "to left" => Some(Self::ToLeft),
            "to bottom" => Some(Self::ToBottom),
            "to top" => Some(Self::ToTop),
            "to bottom right" | "to right bottom" => Some(Self::ToBottomRight),
            "to bottom left" | "to left bottom" => Some(Self::ToBottomLeft),
            "to top right" | "to right top" => Some(Self::ToTopRight),
            "to top left" | "to left top" => Some(Self::ToTopLeft),
            _ => None,
        }
    }

    /// Returns the literal axis for a `width x height` surface.
    pub fn axis(&self, width: f32, height: f32) -> GradientAxis {
        let (x0, y0, x1, y1) = match self {
            Self::ToRight => (0.0, 0.0, width, 0.0),
            Self::ToLeft => (width, 0.0, 0.0, 0.0),
            Self::ToBottom => (0.0, 0.0, 0.0, height),
            Self::ToTop => (0.0, height, 0.0, 0.0),
            Self::ToBottomRight => (0.0, 0.0, width, height),
            Self::ToBottomLeft => (width, 0.0, 0.0, height),
            Self::ToTopRight => (0.0, height, width, 0.0),
            Self::ToTopLeft => (width, height, 0.0, 0.0),
        };
        GradientAxis { x0, y0, x1, y1 }
    }
}

/// The line segment a linear gradient runs along, from stop 0 to stop 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientAxis {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl GradientAxis {
    pub fn length(&self) -> f32 {
        (self.x1 - self.x0).hypot(self.y1 - self.y0)
    }

    pub fn midpoint(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }
}

/// Computes the gradient axis for a CSS-style angle.
///
/// The direction vector is `(sin θ, -cos θ)` so 0° points up and 90° points
/// right. The axis is centered on the surface and spans its full diagonal,
/// which covers every aspect ratio. The caller normalizes the angle.
pub fn gradient_axis(angle_degrees: f32, width: f32, height: f32) -> GradientAxis {
    let theta = angle_degrees.to_radians();
    let (dx, dy) = (theta.sin(), -theta.cos());
    let (cx, cy) = (width / 2.0, height / 2.0);
    let half = width.hypot(height) / 2.0;

    GradientAxis {
        x0: cx - dx * half,
        y0: cy - dy * half,
        x1: cx + dx * half,
        y1: cy + dy * half,
    }
}

// ============================================================================
// Scale factor
// ============================================================================

/// Uniform multiplier applied to every size-bearing style value.
///
/// The preview renders at 1.0. Exports at other resolutions resolve the
/// factor against the reference resolution so the whole composition scales
/// proportionally instead of stretching.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ScaleFactor(f32);

impl ScaleFactor {
    pub const IDENTITY: Self = Self(1.0);

    pub fn new(factor: f32) -> Self {
        Self(factor)
    }

    /// `min(target.w / reference.w, target.h / reference.h)`.
    pub fn resolve(target: SizePx, reference: SizePx) -> Self {
        if reference.is_empty() {
            return Self::IDENTITY;
        }
        let sx = target.width as f32 / reference.width as f32;
        let sy = target.height as f32 / reference.height as f32;
        Self(sx.min(sy))
    }

    pub fn get(&self) -> f32 {
        self.0
    }

    /// Scales a reference-resolution length.
    pub fn apply(&self, px: f32) -> f32 {
        px * self.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Tests
// ============================================================================
