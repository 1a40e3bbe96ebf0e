//! Off-screen raster surfaces.
//!
//! A [`Surface`] wraps a premultiplied-alpha tiny-skia [`Pixmap`]. Layers
//! render into surfaces, the compositor stacks them, and the exporter encodes
//! the result. This module also hosts the pixel helpers every layer shares:
//! gaussian blur, drop shadows, rounded rectangles and conversions to and
//! from `image::RgbaImage`.

use image::{Rgba, RgbaImage};
use resvg::tiny_skia::{
    self, FillRule, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, PixmapRef,
    PremultipliedColorU8, Rect, Transform,
};

use crate::error::{ComposeError, ComposeResult};
use crate::geometry::SizePx;
use crate::style::Color;

/// Largest surface dimension accepted (same limit as browsers).
pub const MAX_DIMENSION: u32 = 32767;

// ============================================================================
// Surface
// ============================================================================

/// An owned RGBA raster buffer.
#[derive(Clone, PartialEq)]
pub struct Surface {
    pixmap: Pixmap,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .finish()
    }
}

impl Surface {
    /// Allocates a fully transparent surface.
    pub fn new(size: SizePx) -> ComposeResult<Self> {
        let invalid = ComposeError::InvalidDimensions {
            width: size.width,
            height: size.height,
        };
        if size.width > MAX_DIMENSION || size.height > MAX_DIMENSION {
            return Err(invalid);
        }
        let pixmap = Pixmap::new(size.width, size.height).ok_or(invalid)?;
        Ok(Self { pixmap })
    }

    pub fn size(&self) -> SizePx {
        SizePx::new(self.pixmap.width(), self.pixmap.height())
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Resets every pixel to transparent.
    pub fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    /// Overwrites every pixel with `color`.
    pub fn fill(&mut self, color: Color) {
        self.pixmap.fill(color.to_skia());
    }

    /// Reads one pixel as a straight-alpha color.
    /// Returns `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let p = self.pixmap.pixel(x, y)?;
        let (r, g, b, a) = unpremultiply(p.red(), p.green(), p.blue(), p.alpha());
        Some(Color::from_rgba8(r, g, b, a))
    }

    /// Returns true if every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixmap.pixels().iter().all(|p| p.alpha() == 0)
    }

    /// Draws `other` at the origin, unscaled, with source-over blending.
    pub fn draw_surface(&mut self, other: &Surface) {
        self.pixmap.draw_pixmap(
            0,
            0,
            other.pixmap.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    /// Applies a gaussian blur with standard deviation `sigma` in place.
    pub fn blur(&mut self, sigma: f32) {
        blur_pixmap(&mut self.pixmap, sigma);
    }

    /// Converts to a straight-alpha `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        pixmap_to_rgba_image(&self.pixmap)
    }

    pub(crate) fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }
}

// ============================================================================
// Drop shadow
// ============================================================================

/// Canvas-style drop shadow parameters, already in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropShadow {
    pub color: Color,
    /// Canvas `shadowBlur`; the gaussian standard deviation is half of it.
    pub blur: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl DropShadow {
    /// Whether drawing with this shadow would paint anything extra.
    pub fn is_visible(&self) -> bool {
        self.color.a > 0 && (self.blur > 0.0 || self.offset_x != 0.0 || self.offset_y != 0.0)
    }
}

/// Draws `src` through `transform` onto `dest`, casting `shadow` beneath it.
///
/// The shape is first rasterized into a scratch buffer the size of `dest` so
/// the shadow follows the transformed (for example rotated) silhouette.
pub(crate) fn draw_with_shadow(
    dest: &mut Pixmap,
    src: PixmapRef<'_>,
    transform: Transform,
    mask: Option<&Mask>,
    shadow: Option<&DropShadow>,
) {
    let paint = PixmapPaint {
        quality: tiny_skia::FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };

    let Some(shadow) = shadow.filter(|s| s.is_visible()) else {
        dest.draw_pixmap(0, 0, src, &paint, transform, mask);
        return;
    };

    let Some(mut shape) = Pixmap::new(dest.width(), dest.height()) else {
        return;
    };
    shape.draw_pixmap(0, 0, src, &paint, transform, mask);
    draw_shadow_of(dest, &shape, shadow);
    dest.draw_pixmap(
        0,
        0,
        shape.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
}

/// Paints the blurred, offset, tinted silhouette of `shape` onto `dest`.
fn draw_shadow_of(dest: &mut Pixmap, shape: &Pixmap, shadow: &DropShadow) {
    let Some(bounds) = opaque_bounds(shape) else {
        return;
    };

    let sigma = shadow.blur / 2.0;
    let margin = blur_margin(sigma);
    let width = bounds.width + 2 * margin;
    let height = bounds.height + 2 * margin;
    let Some(mut tinted) = Pixmap::new(width, height) else {
        return;
    };

    let color = shadow.color;
    let src_pixels = shape.pixels();
    let stride = shape.width() as usize;
    let dst_stride = width as usize;
    let dst_pixels = tinted.pixels_mut();
    for y in 0..bounds.height {
        for x in 0..bounds.width {
            let sx = (bounds.x + x) as usize;
            let sy = (bounds.y + y) as usize;
            let coverage = src_pixels[sy * stride + sx].alpha() as u32;
            if coverage == 0 {
                continue;
            }
            let a = (color.a as u32 * coverage + 127) / 255;
            let premul = |c: u8| ((c as u32 * a + 127) / 255) as u8;
            if let Some(p) =
                PremultipliedColorU8::from_rgba(premul(color.r), premul(color.g), premul(color.b), a as u8)
            {
                let dx = (x + margin) as usize;
                let dy = (y + margin) as usize;
                dst_pixels[dy * dst_stride + dx] = p;
            }
        }
    }

    blur_pixmap(&mut tinted, sigma);

    let origin_x = bounds.x as f32 - margin as f32 + shadow.offset_x;
    let origin_y = bounds.y as f32 - margin as f32 + shadow.offset_y;
    dest.draw_pixmap(
        0,
        0,
        tinted.as_ref(),
        &PixmapPaint::default(),
        Transform::from_translate(origin_x, origin_y),
        None,
    );
}

/// Pixel bounds of the region with non-zero alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelBounds {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

fn opaque_bounds(pixmap: &Pixmap) -> Option<PixelBounds> {
    let width = pixmap.width();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;

    for (i, p) in pixmap.pixels().iter().enumerate() {
        if p.alpha() == 0 {
            continue;
        }
        let x = i as u32 % width;
        let y = i as u32 / width;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    (min_x != u32::MAX).then(|| PixelBounds {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

// ============================================================================
// Blur
// ============================================================================

fn blur_margin(sigma: f32) -> u32 {
    if sigma > 0.0 { (sigma * 3.0).ceil() as u32 } else { 0 }
}

/// Gaussian-blurs premultiplied pixels in place.
///
/// The pixmap is padded with transparent pixels so content near the edges
/// fades out the way a canvas `blur()` filter does.
pub(crate) fn blur_pixmap(pixmap: &mut Pixmap, sigma: f32) {
    if sigma.is_nan() || sigma <= 0.0 {
        return;
    }

    let margin = blur_margin(sigma);
    let width = pixmap.width();
    let height = pixmap.height();
    let mut padded = RgbaImage::new(width + 2 * margin, height + 2 * margin);

    // Premultiplied bytes are blurred as-is: a linear filter keeps them valid.
    let src = pixmap.data();
    let row_bytes = width as usize * 4;
    for y in 0..height {
        let start = y as usize * row_bytes;
        let row = &src[start..start + row_bytes];
        for x in 0..width {
            let i = x as usize * 4;
            padded.put_pixel(
                x + margin,
                y + margin,
                Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]),
            );
        }
    }

    let blurred = image::imageops::fast_blur(&padded, sigma);

    let dst = pixmap.data_mut();
    for y in 0..height {
        for x in 0..width {
            let [r, g, b, a] = blurred.get_pixel(x + margin, y + margin).0;
            let i = (y as usize * width as usize + x as usize) * 4;
            dst[i] = r.min(a);
            dst[i + 1] = g.min(a);
            dst[i + 2] = b.min(a);
            dst[i + 3] = a;
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Builds a rounded rectangle path.
///
/// The radius is clamped to half the shorter side. Returns `None` for empty
/// or non-finite rectangles.
pub(crate) fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    if width.is_nan() || height.is_nan() || width <= 0.0 || height <= 0.0 {
        return None;
    }
    let r = radius.max(0.0).min(width / 2.0).min(height / 2.0);
    if r == 0.0 {
        return Rect::from_xywh(x, y, width, height).map(PathBuilder::from_rect);
    }

    // Cubic approximation of a quarter circle.
    const KAPPA: f32 = 0.552_284_8;
    let k = r * KAPPA;
    let (right, bottom) = (x + width, y + height);

    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(right - r, y);
    pb.cubic_to(right - r + k, y, right, y + r - k, right, y + r);
    pb.line_to(right, bottom - r);
    pb.cubic_to(right, bottom - r + k, right - r + k, bottom, right - r, bottom);
    pb.line_to(x + r, bottom);
    pb.cubic_to(x + r - k, bottom, x, bottom - r + k, x, bottom - r);
    pb.line_to(x, y + r);
    pb.cubic_to(x, y + r - k, x + r - k, y, x + r, y);
    pb.close();
    pb.finish()
}

/// Fills `path` with a solid color.
pub(crate) fn fill_path(pixmap: &mut Pixmap, path: &Path, color: Color, transform: Transform) {
    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    paint.anti_alias = true;
    pixmap.fill_path(path, &paint, FillRule::Winding, transform, None);
}

/// Builds a clip mask covering `path`.
pub(crate) fn clip_mask(width: u32, height: u32, path: &Path) -> Option<Mask> {
    let mut mask = Mask::new(width, height)?;
    mask.fill_path(path, FillRule::Winding, true, Transform::identity());
    Some(mask)
}

// ============================================================================
// Conversions
// ============================================================================

/// Converts a tiny_skia Pixmap to an image::RgbaImage.
pub(crate) fn pixmap_to_rgba_image(pixmap: &Pixmap) -> RgbaImage {
    let width = pixmap.width();
    let mut img = RgbaImage::new(width, pixmap.height());

    for (i, pixel) in pixmap.pixels().iter().enumerate() {
        let x = i as u32 % width;
        let y = i as u32 / width;
        // tiny_skia uses premultiplied alpha, we need to unpremultiply
        let (r, g, b, a) = unpremultiply(pixel.red(), pixel.green(), pixel.blue(), pixel.alpha());
        img.put_pixel(x, y, Rgba([r, g, b, a]));
    }

    img
}

/// Converts a straight-alpha image into a premultiplied pixmap.
///
/// Returns `None` for zero-sized images.
pub(crate) fn rgba_image_to_pixmap(img: &RgbaImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(img.width(), img.height())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(img.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

/// Unpremultiplies a premultiplied alpha pixel.
fn unpremultiply(r: u8, g: u8, b: u8, a: u8) -> (u8, u8, u8, u8) {
    if a == 0 {
        (0, 0, 0, 0)
    } else {
        let a_f = a as f32 / 255.0;
        (
            (r as f32 / a_f).round().min(255.0) as u8,
            (g as f32 / a_f).round().min(255.0) as u8,
            (b as f32 / a_f).round().min(255.0) as u8,
            a,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(w: u32, h: u32) -> Surface {
        Surface::new(SizePx::new(w, h)).unwrap()
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(matches!(
            Surface::new(SizePx::new(0, 10)),
            Err(ComposeError::InvalidDimensions { width: 0, height: 10 })
        ));
        assert!(Surface::new(SizePx::new(MAX_DIMENSION + 1, 1)).is_err());
    }

    #[test]
    fn fill_and_read_back() {
        let mut s = surface(4, 4);
        assert!(s.is_blank());

        s.fill(Color::from_rgb8(10, 20, 30));
        assert_eq!(s.pixel(3, 3), Some(Color::from_rgb8(10, 20, 30)));
        assert_eq!(s.pixel(4, 0), None);
        assert_eq!(s.pixel(4, 3), None);
        assert_eq!(s.pixel(0, 4), None);

        s.clear();
        assert!(s.is_blank());
    }

    #[test]
    fn draw_surface_is_source_over() {
        let mut dest = surface(4, 4);
        dest.fill(Color::from_rgb8(255, 0, 0));

        let mut top = surface(4, 4);
        top.fill(Color::from_rgb8(0, 0, 255));
        dest.draw_surface(&top);
        assert_eq!(dest.pixel(0, 0), Some(Color::from_rgb8(0, 0, 255)));

        let transparent = surface(4, 4);
        dest.draw_surface(&transparent);
        assert_eq!(dest.pixel(0, 0), Some(Color::from_rgb8(0, 0, 255)));
    }

    #[test]
    fn blur_spreads_coverage_but_keeps_uniform_color() {
        let mut s = surface(21, 21);
        let path = rounded_rect_path(8.0, 8.0, 5.0, 5.0, 0.0).unwrap();
        fill_path(s.pixmap_mut(), &path, Color::from_rgb8(0, 200, 0), Transform::identity());
        assert_eq!(s.pixel(2, 10).unwrap().a, 0);

        s.blur(2.0);
        let near = s.pixel(6, 10).unwrap();
        assert!(near.a > 0, "blur should spread alpha outward");
        let center = s.pixel(10, 10).unwrap();
        assert!(center.g > 150 && center.r < 10);
    }

    #[test]
    fn zero_blur_is_a_no_op() {
        let mut s = surface(3, 3);
        s.fill(Color::from_rgb8(1, 2, 3));
        let before = s.clone();
        s.blur(0.0);
        assert_eq!(s, before);
    }

    #[test]
    fn shadow_paints_offset_silhouette() {
        let mut dest = surface(40, 40);
        let mut tile = Pixmap::new(10, 10).unwrap();
        tile.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        let shadow = DropShadow {
            color: Color::BLACK,
            blur: 0.0,
            offset_x: 15.0,
            offset_y: 0.0,
        };
        draw_with_shadow(
            dest.pixmap_mut(),
            tile.as_ref(),
            Transform::from_translate(5.0, 5.0),
            None,
            Some(&shadow),
        );

        assert_eq!(dest.pixel(8, 8), Some(Color::WHITE));
        assert_eq!(dest.pixel(23, 8), Some(Color::BLACK));
        assert_eq!(dest.pixel(35, 35).unwrap().a, 0);
    }

    #[test]
    fn invisible_shadow_draws_plain() {
        let shadow = DropShadow {
            color: Color::TRANSPARENT,
            blur: 10.0,
            offset_x: 3.0,
            offset_y: 3.0,
        };
        assert!(!shadow.is_visible());
        assert!(
            !DropShadow {
                color: Color::BLACK,
                blur: 0.0,
                offset_x: 0.0,
                offset_y: 0.0
            }
            .is_visible()
        );
    }

    #[test]
    fn rounded_rect_rejects_degenerate() {
        assert!(rounded_rect_path(0.0, 0.0, 0.0, 10.0, 3.0).is_none());
        assert!(rounded_rect_path(0.0, 0.0, -5.0, 10.0, 3.0).is_none());
        assert!(rounded_rect_path(0.0, 0.0, 10.0, 10.0, 50.0).is_some());
    }

    #[test]
    fn rgba_round_trip_preserves_opaque_pixels() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([12, 34, 56, 255]));
        let pixmap = rgba_image_to_pixmap(&img).unwrap();
        assert_eq!(pixmap_to_rgba_image(&pixmap), img);
    }
}
