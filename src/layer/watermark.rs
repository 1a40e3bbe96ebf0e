//! Watermark layer: a small italic caption in the bottom-right corner.

use super::{LayerKind, LayerRenderer, RenderContext};
use crate::error::ComposeResult;
use crate::geometry::{ScaleFactor, SizePx};
use crate::style::{WATERMARK_FONT_SIZE_PX, WatermarkStyle};
use crate::surface::Surface;
use crate::text::{FontSpec, TextAlign, TextBaseline};

/// Distance of the anchor from the right and bottom edges, reference pixels.
const WATERMARK_INSET_PX: f32 = 20.0;

/// Right-aligned, alphabetic-baseline anchor of the watermark.
pub fn watermark_anchor(size: SizePx, scale: ScaleFactor) -> (f32, f32) {
    let inset = scale.apply(WATERMARK_INSET_PX);
    (size.width as f32 - inset, size.height as f32 - inset)
}

impl LayerRenderer for WatermarkStyle {
    const KIND: LayerKind = LayerKind::Watermark;

    fn render(&self, surface: &mut Surface, ctx: &mut RenderContext<'_>) -> ComposeResult<()> {
        surface.clear();

        let (x, y) = watermark_anchor(surface.size(), ctx.scale);
        log::debug!(target: "text", "watermark at ({}, {}) in italic {}", x, y, ctx.font.css());
        let font = FontSpec {
            stack: ctx.font,
            size_px: ctx.scale.apply(WATERMARK_FONT_SIZE_PX),
            weight: 400,
            italic: true,
        };
        ctx.text.fill_line(
            surface.pixmap_mut(),
            &self.text,
            x,
            y,
            &font,
            self.color,
            TextAlign::Right,
            TextBaseline::Alphabetic,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DEFAULT_REFERENCE_SIZE;

    #[test]
    fn anchor_is_inset_from_bottom_right() {
        assert_eq!(
            watermark_anchor(DEFAULT_REFERENCE_SIZE, ScaleFactor::IDENTITY),
            (1900.0, 1060.0)
        );
        assert_eq!(
            watermark_anchor(SizePx::new(3840, 2160), ScaleFactor::new(2.0)),
            (3800.0, 2120.0)
        );
    }
}
