//! Text layer: centered, multi-line, optionally with a 3-D drop shadow.

use resvg::tiny_skia::{Pixmap, Transform};

use super::{LayerKind, LayerRenderer, RenderContext};
use crate::error::{ComposeError, ComposeResult};
use crate::geometry::{ScaleFactor, SizePx};
use crate::style::{Color, TextStyle};
use crate::surface::{DropShadow, Surface, draw_with_shadow};
use crate::text::{FontSpec, TextAlign, TextBaseline};

const TEXT_WEIGHT: u16 = 600;

/// Shadow color for the 3-D effect, `rgba(0, 0, 0, 0.4)`.
const DEPTH_SHADOW: Color = Color::from_rgba8(0, 0, 0, 102);

/// Vertical placement of each line.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    /// Distance between consecutive line centers.
    pub pitch: f32,
    /// Horizontal center shared by all lines.
    pub center_x: f32,
    /// Vertical center of each line, top to bottom.
    pub line_centers: Vec<f32>,
}

/// Lays out `style.content` centered in a `size` surface.
///
/// The block of `N` lines is `pitch * N` tall and vertically centered; each
/// line is drawn with a middle baseline at its own center.
pub fn text_layout(style: &TextStyle, size: SizePx, scale: ScaleFactor) -> TextLayout {
    let pitch = scale.apply(style.size_px) * style.line_height;
    let count = style.content.split('\n').count();
    let first = (size.height as f32 - pitch * count as f32) / 2.0 + pitch / 2.0;

    TextLayout {
        pitch,
        center_x: size.width as f32 / 2.0,
        line_centers: (0..count).map(|i| first + i as f32 * pitch).collect(),
    }
}

impl TextStyle {
    /// The 3-D shadow at `scale`, or `None` when depth is zero.
    pub fn depth_shadow(&self, scale: ScaleFactor) -> Option<DropShadow> {
        (self.depth_px > 0.0).then(|| DropShadow {
            color: DEPTH_SHADOW,
            blur: scale.apply(self.depth_px * 0.5),
            offset_x: scale.apply(self.depth_px),
            offset_y: scale.apply(self.depth_px),
        })
    }
}

impl LayerRenderer for TextStyle {
    const KIND: LayerKind = LayerKind::Text;

    fn render(&self, surface: &mut Surface, ctx: &mut RenderContext<'_>) -> ComposeResult<()> {
        surface.clear();

        let layout = text_layout(self, surface.size(), ctx.scale);
        log::debug!(target: "text", "text layer: {} lines in {}", layout.line_centers.len(), ctx.font.css());
        let font = FontSpec {
            stack: ctx.font,
            size_px: ctx.scale.apply(self.size_px),
            weight: TEXT_WEIGHT,
            italic: false,
        };

        let shadow = self.depth_shadow(ctx.scale);
        let mut scratch = match shadow {
            Some(_) => Some(Pixmap::new(surface.width(), surface.height()).ok_or(
                ComposeError::InvalidDimensions {
                    width: surface.width(),
                    height: surface.height(),
                },
            )?),
            None => None,
        };

        {
            let target = match scratch.as_mut() {
                Some(pixmap) => pixmap,
                None => surface.pixmap_mut(),
            };
            for (line, y) in self.content.split('\n').zip(&layout.line_centers) {
                ctx.text.fill_line(
                    target,
                    line,
                    layout.center_x,
                    *y,
                    &font,
                    self.color,
                    TextAlign::Center,
                    TextBaseline::Middle,
                );
            }
        }

        if let Some(pixmap) = scratch {
            draw_with_shadow(
                surface.pixmap_mut(),
                pixmap.as_ref(),
                Transform::identity(),
                None,
                shadow.as_ref(),
            );
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
