//! Background layer: flat color, linear gradient, or blurred cover image.

use resvg::tiny_skia::{
    FilterQuality, GradientStop, LinearGradient, Paint, Pixmap, PixmapPaint, Point, Rect,
    SpreadMode, Transform,
};

use super::{LayerKind, LayerRenderer, RenderContext};
use crate::error::{ComposeError, ComposeResult};
use crate::geometry::{GradientAxis, gradient_axis};
use crate::image_cache::ImageHandle;
use crate::style::{BackgroundMode, BackgroundStyle};
use crate::surface::{Surface, blur_pixmap};

impl BackgroundStyle {
    /// The gradient axis for a `width x height` surface.
    ///
    /// A legacy named direction wins over the angle.
    pub fn gradient_axis(&self, width: f32, height: f32) -> GradientAxis {
        match self.gradient_direction {
            Some(direction) => direction.axis(width, height),
            None => gradient_axis(self.gradient_angle, width, height),
        }
    }
}

impl LayerRenderer for BackgroundStyle {
    const KIND: LayerKind = LayerKind::Background;

    fn image(&self) -> Option<ImageHandle> {
        match self.mode {
            BackgroundMode::Image => self.image,
            _ => None,
        }
    }

    fn render(&self, surface: &mut Surface, ctx: &mut RenderContext<'_>) -> ComposeResult<()> {
        if let Some(handle) = LayerRenderer::image(self) {
            let bitmap = ctx.images.bitmap(handle)?;
            let sigma = ctx.scale.apply(self.blur_radius);
            return draw_cover(surface, &bitmap, sigma);
        }

        surface.clear();
        match self.mode {
            BackgroundMode::Gradient => fill_gradient(surface, self),
            // An image mode without an image falls back to the flat color.
            BackgroundMode::Color | BackgroundMode::Image => surface.fill(self.color),
        }
        Ok(())
    }
}

fn fill_gradient(surface: &mut Surface, style: &BackgroundStyle) {
    let (w, h) = (surface.width() as f32, surface.height() as f32);
    let axis = style.gradient_axis(w, h);

    let shader = LinearGradient::new(
        Point::from_xy(axis.x0, axis.y0),
        Point::from_xy(axis.x1, axis.y1),
        vec![
            GradientStop::new(0.0, style.gradient_start.to_skia()),
            GradientStop::new(1.0, style.gradient_end.to_skia()),
        ],
        SpreadMode::Pad,
        Transform::identity(),
    );

    let Some(shader) = shader else {
        // Zero-length axis.
        surface.fill(style.gradient_start);
        return;
    };
    let Some(rect) = Rect::from_xywh(0.0, 0.0, w, h) else {
        return;
    };

    let paint = Paint {
        shader,
        anti_alias: false,
        ..Paint::default()
    };
    surface
        .pixmap_mut()
        .fill_rect(rect, &paint, Transform::identity(), None);
}

/// Draws `bitmap` cover-fit and centered, then blurs it.
///
/// The image is drawn into a scratch buffer with a margin around the visible
/// area so the cropped overflow, not transparency, bleeds in at the edges.
fn draw_cover(surface: &mut Surface, bitmap: &Pixmap, sigma: f32) -> ComposeResult<()> {
    let (w, h) = (surface.width() as f32, surface.height() as f32);
    let (iw, ih) = (bitmap.width() as f32, bitmap.height() as f32);
    let scale = (w / iw).max(h / ih);
    let x = (w - iw * scale) / 2.0;
    let y = (h - ih * scale) / 2.0;

    let margin = if sigma > 0.0 { (sigma * 3.0).ceil() } else { 0.0 };
    let scratch_w = surface.width() + 2 * margin as u32;
    let scratch_h = surface.height() + 2 * margin as u32;
    let mut scratch = Pixmap::new(scratch_w, scratch_h).ok_or(ComposeError::InvalidDimensions {
        width: scratch_w,
        height: scratch_h,
    })?;

    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    scratch.draw_pixmap(
        0,
        0,
        bitmap.as_ref(),
        &paint,
        Transform::from_row(scale, 0.0, 0.0, scale, x + margin, y + margin),
        None,
    );
    blur_pixmap(&mut scratch, sigma);

    surface.clear();
    surface.pixmap_mut().draw_pixmap(
        0,
        0,
        scratch.as_ref(),
        &PixmapPaint::default(),
        Transform::from_translate(-margin, -margin),
        None,
    );
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GradientDirection, ScaleFactor, SizePx};
    use crate::image_cache::ImageCache;
    use crate::style::Color;
    use crate::text::{AMBIENT_FAMILY, FontStack, TextEngine};
    use image::{Rgba, RgbaImage};

    fn render(style: &BackgroundStyle, size: SizePx, images: &ImageCache) -> ComposeResult<Surface> {
        let mut surface = Surface::new(size).unwrap();
        let mut engine = TextEngine::empty();
        let font = FontStack::ambient(AMBIENT_FAMILY);
        let mut ctx = RenderContext {
            scale: ScaleFactor::IDENTITY,
            text: &mut engine,
            font: &font,
            images,
        };
        style.render(&mut surface, &mut ctx)?;
        Ok(surface)
    }

    fn close(a: Color, b: Color, tolerance: u8) -> bool {
        a.r.abs_diff(b.r) <= tolerance
            && a.g.abs_diff(b.g) <= tolerance
            && a.b.abs_diff(b.b) <= tolerance
            && a.a.abs_diff(b.a) <= tolerance
    }

    #[test]
    fn flat_color_fills_everything() {
        let style = BackgroundStyle {
            color: Color::from_rgb8(1, 2, 3),
            ..BackgroundStyle::default()
        };
        let surface = render(&style, SizePx::new(8, 8), &ImageCache::new()).unwrap();
        assert_eq!(surface.pixel(0, 0), Some(Color::from_rgb8(1, 2, 3)));
        assert_eq!(surface.pixel(7, 7), Some(Color::from_rgb8(1, 2, 3)));
    }

    #[test]
    fn gradient_135_runs_top_left_to_bottom_right() {
        let style = BackgroundStyle {
            mode: BackgroundMode::Gradient,
            gradient_start: Color::from_rgb8(255, 0, 0),
            gradient_end: Color::from_rgb8(0, 0, 255),
            gradient_angle: 135.0,
            ..BackgroundStyle::default()
        };
        let surface = render(&style, SizePx::new(192, 108), &ImageCache::new()).unwrap();

        let top_left = surface.pixel(0, 0).unwrap();
        let bottom_right = surface.pixel(191, 107).unwrap();
        assert!(close(top_left, Color::from_rgb8(255, 0, 0), 12), "{top_left}");
        assert!(close(bottom_right, Color::from_rgb8(0, 0, 255), 12), "{bottom_right}");
    }

    #[test]
    fn named_direction_overrides_angle() {
        let style = BackgroundStyle {
            mode: BackgroundMode::Gradient,
            gradient_start: Color::BLACK,
            gradient_end: Color::WHITE,
            gradient_angle: 0.0,
            gradient_direction: Some(GradientDirection::ToRight),
            ..BackgroundStyle::default()
        };
        let surface = render(&style, SizePx::new(100, 10), &ImageCache::new()).unwrap();
        let left = surface.pixel(0, 5).unwrap();
        let right = surface.pixel(99, 5).unwrap();
        assert!(left.r < 10 && right.r > 245);
        // Same column, same color: the axis is horizontal.
        assert_eq!(surface.pixel(50, 0), surface.pixel(50, 9));
    }

    #[test]
    fn cover_image_fills_and_centers() {
        let mut images = ImageCache::new();
        // Left half red, right half green; wider than the target.
        let img = RgbaImage::from_fn(40, 10, |x, _| {
            if x < 20 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 255, 0, 255]) }
        });
        let handle = images.insert_decoded(&img).unwrap();
        let style = BackgroundStyle {
            mode: BackgroundMode::Image,
            image: Some(handle),
            blur_radius: 0.0,
            ..BackgroundStyle::default()
        };

        let surface = render(&style, SizePx::new(20, 20), &images).unwrap();
        assert!(surface.pixel(0, 0).unwrap().is_opaque());
        assert!(surface.pixel(19, 19).unwrap().is_opaque());
        assert!(close(surface.pixel(2, 10).unwrap(), Color::from_rgb8(255, 0, 0), 2));
        assert!(close(surface.pixel(17, 10).unwrap(), Color::from_rgb8(0, 255, 0), 2));
    }

    #[test]
    fn blurred_cover_image_bleeds_overflow_at_edges() {
        let mut images = ImageCache::new();
        let img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 200, 255]));
        let handle = images.insert_decoded(&img).unwrap();
        let style = BackgroundStyle {
            mode: BackgroundMode::Image,
            image: Some(handle),
            blur_radius: 3.0,
            ..BackgroundStyle::default()
        };

        // 30x30 after cover fit: overflow only above and below.
        let surface = render(&style, SizePx::new(30, 20), &images).unwrap();
        assert!(close(surface.pixel(15, 10).unwrap(), Color::from_rgb8(0, 0, 200), 3));

        let top = surface.pixel(15, 0).unwrap();
        let left = surface.pixel(0, 10).unwrap();
        assert!(top.a > left.a + 50, "top {top}, left {left}");
    }

    #[test]
    fn missing_image_leaves_surface_untouched() {
        let style = BackgroundStyle {
            mode: BackgroundMode::Image,
            image: Some(ImageCache::new().insert_bytes(vec![0u8])),
            ..BackgroundStyle::default()
        };
        let mut surface = Surface::new(SizePx::new(4, 4)).unwrap();
        surface.fill(Color::from_rgb8(7, 7, 7));

        let mut engine = TextEngine::empty();
        let font = FontStack::ambient(AMBIENT_FAMILY);
        let images = ImageCache::new();
        let mut ctx = RenderContext {
            scale: ScaleFactor::IDENTITY,
            text: &mut engine,
            font: &font,
            images: &images,
        };
        assert!(style.render(&mut surface, &mut ctx).is_err());
        assert_eq!(surface.pixel(1, 1), Some(Color::from_rgb8(7, 7, 7)));
    }

    #[test]
    fn image_mode_without_image_uses_color() {
        let style = BackgroundStyle {
            mode: BackgroundMode::Image,
            image: None,
            color: Color::from_rgb8(50, 60, 70),
            ..BackgroundStyle::default()
        };
        let surface = render(&style, SizePx::new(4, 4), &ImageCache::new()).unwrap();
        assert_eq!(surface.pixel(2, 2), Some(Color::from_rgb8(50, 60, 70)));
    }
}
