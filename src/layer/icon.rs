//! Icon layer: a rounded, optionally plated, rotated tile with a drop shadow.
//!
//! The tile is assembled off-screen at its final pixel size:
//!
//! ```text
//!  ┌──────────── total ────────────┐
//!  │ border                        │
//!  │   ╭─────── inner ───────╮     │
//!  │   │  image, contain-fit │     │
//!  │   ╰─────────────────────╯     │
//!  └───────────────────────────────┘
//! ```
//!
//! then drawn centered on the layer, rotated about its own center.

use resvg::tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

use super::{LayerKind, LayerRenderer, RenderContext};
use crate::error::ComposeResult;
use crate::geometry::{ScaleFactor, SizePx};
use crate::image_cache::ImageHandle;
use crate::style::{ICON_BORDER_PX, ICON_CORNER_RADIUS_PX, IconStyle};
use crate::surface::{DropShadow, Surface, clip_mask, draw_with_shadow, fill_path, rounded_rect_path};

/// Pixel geometry of the icon tile at a given scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IconGeometry {
    pub total_size: f32,
    pub border: f32,
    pub inner_size: f32,
    pub radius: f32,
    /// Top-left corner of the unrotated tile on the layer.
    pub x: f32,
    pub y: f32,
}

impl IconGeometry {
    /// True if there is no room left for the image inside the border.
    pub fn is_degenerate(&self) -> bool {
        self.inner_size.is_nan() || self.inner_size <= 0.0
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.total_size / 2.0, self.y + self.total_size / 2.0)
    }
}

/// Computes the tile geometry for `style` on a `size` layer.
pub fn icon_geometry(style: &IconStyle, size: SizePx, scale: ScaleFactor) -> IconGeometry {
    let total_size = scale.apply(style.size_px);
    let border = scale.apply(ICON_BORDER_PX);

    IconGeometry {
        total_size,
        border,
        inner_size: total_size - 2.0 * border,
        radius: scale.apply(ICON_CORNER_RADIUS_PX),
        x: (size.width as f32 - total_size) / 2.0,
        y: (size.height as f32 - total_size) / 2.0,
    }
}

impl IconStyle {
    /// The tile's drop shadow at `scale`.
    pub fn drop_shadow(&self, scale: ScaleFactor) -> DropShadow {
        DropShadow {
            color: self.shadow.color,
            blur: scale.apply(self.shadow.blur_px),
            offset_x: scale.apply(self.shadow.offset_x_px),
            offset_y: scale.apply(self.shadow.offset_y_px),
        }
    }

    /// Sets the shadow from a single strength value: a centered glow whose
    /// blur is twice the strength.
    pub fn set_shadow_strength(&mut self, strength: f32) {
        self.shadow.blur_px = 2.0 * strength.max(0.0);
        self.shadow.offset_x_px = 0.0;
        self.shadow.offset_y_px = 0.0;
    }
}

impl LayerRenderer for IconStyle {
    const KIND: LayerKind = LayerKind::Icon;

    fn image(&self) -> Option<ImageHandle> {
        self.image
    }

    fn render(&self, surface: &mut Surface, ctx: &mut RenderContext<'_>) -> ComposeResult<()> {
        let Some(handle) = self.image else {
            surface.clear();
            return Ok(());
        };
        let bitmap = ctx.images.bitmap(handle)?;
        surface.clear();

        let geometry = icon_geometry(self, surface.size(), ctx.scale);
        if geometry.is_degenerate() {
            log::debug!(target: "composer", "icon too small to draw: {:?}", geometry);
            return Ok(());
        }
        let Some(tile) = build_tile(self, &geometry, &bitmap, ctx.scale) else {
            return Ok(());
        };

        let (cx, cy) = geometry.center();
        let transform = Transform::from_translate(geometry.x, geometry.y)
            .post_concat(Transform::from_rotate_at(self.rotation_degrees, cx, cy));
        let shadow = self.drop_shadow(ctx.scale);
        draw_with_shadow(
            surface.pixmap_mut(),
            tile.as_ref(),
            transform,
            None,
            Some(&shadow),
        );
        Ok(())
    }
}

/// Renders the unrotated tile: plate, then the clipped, contain-fit image.
fn build_tile(
    style: &IconStyle,
    geometry: &IconGeometry,
    bitmap: &Pixmap,
    scale: ScaleFactor,
) -> Option<Pixmap> {
    let side = geometry.total_size.ceil() as u32;
    let mut tile = Pixmap::new(side, side)?;
    let IconGeometry {
        border,
        inner_size: inner,
        radius,
        ..
    } = *geometry;

    let padding = scale.apply(style.background_padding_px);
    if padding > 0.0 {
        if let Some(plate) = rounded_rect_path(
            border - padding,
            border - padding,
            inner + 2.0 * padding,
            inner + 2.0 * padding,
            radius,
        ) {
            fill_path(&mut tile, &plate, style.background_color, Transform::identity());
        }
    }

    let clip = rounded_rect_path(border, border, inner, inner, radius)
        .and_then(|path| clip_mask(side, side, &path))?;

    let (iw, ih) = (bitmap.width() as f32, bitmap.height() as f32);
    let aspect = iw / ih;
    let (w, h) = if aspect > 1.0 {
        (inner, inner / aspect)
    } else {
        (inner * aspect, inner)
    };
    let x = border + (inner - w) / 2.0;
    let y = border + (inner - h) / 2.0;

    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    tile.draw_pixmap(
        0,
        0,
        bitmap.as_ref(),
        &paint,
        Transform::from_row(w / iw, 0.0, 0.0, h / ih, x, y),
        Some(&clip),
    );
    Some(tile)
}

// ============================================================================
// Tests
// ============================================================================
