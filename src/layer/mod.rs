//! Layer infrastructure for cover composition.
//!
//! The cover is built from four independently rendered layer surfaces, each
//! the size of the output. Each style block implements [`LayerRenderer`],
//! which knows how to draw that block into its own surface. A [`Layer`] wraps
//! the surface with a dirty flag and a version counter, and [`LayerStack`]
//! owns the four layers in their fixed z-order.
//!
//! # Z-order
//!
//! ```text
//! ┌─────────────┐
//! │  Watermark  │ ◄── top
//! ├─────────────┤
//! │    Icon     │
//! ├─────────────┤
//! │    Text     │
//! ├─────────────┤
//! │ Background  │ ◄── bottom
//! └─────────────┘
//! ```
//!
//! Renderers never composite. The compositor ([`compose`] and
//! [`compose_over`]) is the only code that merges layer surfaces.

pub mod background;
pub mod icon;
pub mod text;
pub mod watermark;

pub use icon::{IconGeometry, icon_geometry};
pub use text::{TextLayout, text_layout};
pub use watermark::watermark_anchor;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{ComposeError, ComposeResult};
use crate::geometry::{ScaleFactor, SizePx};
use crate::image_cache::{ImageCache, ImageHandle};
use crate::style::{Color, StyleState};
use crate::surface::Surface;
use crate::text::{FontStack, TextEngine};

// ============================================================================
// Layer kinds
// ============================================================================

/// One of the four cover layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Background,
    Text,
    Icon,
    Watermark,
}

impl LayerKind {
    /// All layers, bottom to top.
    pub const Z_ORDER: [LayerKind; 4] = [
        LayerKind::Background,
        LayerKind::Text,
        LayerKind::Icon,
        LayerKind::Watermark,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Background => "background",
            LayerKind::Text => "text",
            LayerKind::Icon => "icon",
            LayerKind::Watermark => "watermark",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn bit(&self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of layers, used to declare which layers a style change invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayerSet(u8);

impl LayerSet {
    pub const EMPTY: Self = Self(0);
    pub const BACKGROUND: Self = Self(1 << 0);
    pub const TEXT: Self = Self(1 << 1);
    pub const ICON: Self = Self(1 << 2);
    pub const WATERMARK: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(&self, kind: LayerKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: LayerKind) {
        self.0 |= kind.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the members bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = LayerKind> + '_ {
        LayerKind::Z_ORDER
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl From<LayerKind> for LayerSet {
    fn from(kind: LayerKind) -> Self {
        Self(kind.bit())
    }
}

impl BitOr for LayerSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LayerSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ============================================================================
// Render context and renderer trait
// ============================================================================

/// Shared inputs every renderer reads.
pub struct RenderContext<'a> {
    /// Multiplier for every size-bearing style value.
    pub scale: ScaleFactor,
    pub text: &'a mut TextEngine,
    /// Effective font stack for text and watermark.
    pub font: &'a FontStack,
    /// Decoded bitmaps. Handles must be decoded before rendering.
    pub images: &'a ImageCache,
}

/// Draws one style block into its layer surface.
///
/// Implementations clear the surface themselves and must leave it untouched
/// when they return an error.
pub trait LayerRenderer {
    const KIND: LayerKind;

    /// The image this layer will read, if any.
    fn image(&self) -> Option<ImageHandle> {
        None
    }

    fn render(&self, surface: &mut Surface, ctx: &mut RenderContext<'_>) -> ComposeResult<()>;
}

// ============================================================================
// Layer
// ============================================================================

/// A layer surface with dirty tracking.
///
/// The version increments each time the surface content is redrawn.
#[derive(Debug)]
pub struct Layer {
    kind: LayerKind,
    surface: Surface,
    dirty: bool,
    version: u64,
}

impl Layer {
    /// Allocates a transparent, dirty layer.
    pub fn new(kind: LayerKind, size: SizePx) -> ComposeResult<Self> {
        Ok(Self {
            kind,
            surface: Surface::new(size)?,
            dirty: true,
            version: 0,
        })
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks the layer for redraw on the next render pass.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Redraws the layer with `renderer`.
    ///
    /// The layer is clean afterwards even on failure: a failed image stays
    /// failed, so redrawing would only repeat the error.
    pub fn render<R: LayerRenderer>(
        &mut self,
        renderer: &R,
        ctx: &mut RenderContext<'_>,
    ) -> ComposeResult<()> {
        debug_assert_eq!(R::KIND, self.kind);
        self.dirty = false;
        renderer.render(&mut self.surface, ctx)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }
}

// ============================================================================
// Layer stack
// ============================================================================

/// The four layers of a cover, all the same size.
#[derive(Debug)]
pub struct LayerStack {
    size: SizePx,
    layers: [Layer; 4],
}

impl LayerStack {
    /// Allocates four transparent, dirty layers of `size`.
    pub fn new(size: SizePx) -> ComposeResult<Self> {
        Ok(Self {
            size,
            layers: [
                Layer::new(LayerKind::Background, size)?,
                Layer::new(LayerKind::Text, size)?,
                Layer::new(LayerKind::Icon, size)?,
                Layer::new(LayerKind::Watermark, size)?,
            ],
        })
    }

    pub fn size(&self) -> SizePx {
        self.size
    }

    pub fn layer(&self, kind: LayerKind) -> &Layer {
        &self.layers[kind.index()]
    }

    /// Layers bottom to top.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// Reallocates every layer at `size`, leaving all of them dirty.
    pub fn resize(&mut self, size: SizePx) -> ComposeResult<()> {
        *self = Self::new(size)?;
        Ok(())
    }

    pub fn invalidate(&mut self, set: LayerSet) {
        for kind in set.iter() {
            self.layers[kind.index()].invalidate();
        }
    }

    /// The layers waiting for a redraw.
    pub fn dirty(&self) -> LayerSet {
        let mut set = LayerSet::EMPTY;
        for layer in self.layers.iter().filter(|l| l.is_dirty()) {
            set.insert(layer.kind());
        }
        set
    }

    /// Images the layers in `set` will read when rendered with `style`.
    pub fn images_needed(style: &StyleState, set: LayerSet) -> Vec<ImageHandle> {
        set.iter()
            .filter_map(|kind| match kind {
                LayerKind::Background => style.background.image(),
                LayerKind::Icon => style.icon.image(),
                LayerKind::Text | LayerKind::Watermark => None,
            })
            .collect()
    }

    /// Redraws every dirty layer and returns the layers that failed.
    ///
    /// A failing layer keeps its previous content; the others still redraw.
    pub fn render_dirty(
        &mut self,
        style: &StyleState,
        ctx: &mut RenderContext<'_>,
    ) -> (LayerSet, Vec<ComposeError>) {
        let mut redrawn = LayerSet::EMPTY;
        let mut failures = Vec::new();

        for kind in self.dirty().iter() {
            match self.render_layer(kind, style, ctx) {
                Ok(()) => redrawn.insert(kind),
                Err(err) => {
                    log::warn!(target: "composer", "{} layer not redrawn: {}", kind, err);
                    failures.push(err);
                }
            }
        }
        (redrawn, failures)
    }

    /// Redraws all four layers, stopping at the first failure.
    pub fn render_all(&mut self, style: &StyleState, ctx: &mut RenderContext<'_>) -> ComposeResult<()> {
        for kind in LayerKind::Z_ORDER {
            self.render_layer(kind, style, ctx)?;
        }
        Ok(())
    }

    fn render_layer(
        &mut self,
        kind: LayerKind,
        style: &StyleState,
        ctx: &mut RenderContext<'_>,
    ) -> ComposeResult<()> {
        log::debug!(target: "composer", "rendering {} layer at scale {}", kind, ctx.scale.get());
        let layer = &mut self.layers[kind.index()];
        match kind {
            LayerKind::Background => layer.render(&style.background, ctx),
            LayerKind::Text => layer.render(&style.text, ctx),
            LayerKind::Icon => layer.render(&style.icon, ctx),
            LayerKind::Watermark => layer.render(&style.watermark, ctx),
        }
    }
}

// ============================================================================
// Compositor
// ============================================================================

/// Clears `dest` and draws the layers bottom to top at the origin.
pub fn compose(dest: &mut Surface, layers: &LayerStack) {
    dest.clear();
    for layer in layers.layers() {
        dest.draw_surface(layer.surface());
    }
}

/// Like [`compose`], but over an opaque `base` color instead of transparency.
pub fn compose_over(dest: &mut Surface, layers: &LayerStack, base: Color) {
    dest.fill(base);
    for layer in layers.layers() {
        dest.draw_surface(layer.surface());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::BackgroundMode;
    use crate::text::AMBIENT_FAMILY;

    fn small() -> SizePx {
        SizePx::new(64, 36)
    }

    fn render_dirty(stack: &mut LayerStack, style: &StyleState) -> (LayerSet, Vec<ComposeError>) {
        let mut engine = TextEngine::empty();
        let font = FontStack::ambient(AMBIENT_FAMILY);
        let images = ImageCache::new();
        let mut ctx = RenderContext {
            scale: ScaleFactor::IDENTITY,
            text: &mut engine,
            font: &font,
            images: &images,
        };
        stack.render_dirty(style, &mut ctx)
    }

    #[test]
    fn layer_set_operations() {
        let set = LayerSet::TEXT | LayerSet::WATERMARK;
        assert!(set.contains(LayerKind::Text));
        assert!(!set.contains(LayerKind::Icon));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![LayerKind::Text, LayerKind::Watermark]
        );
        assert_eq!(LayerSet::ALL.iter().count(), 4);
        assert!(LayerSet::EMPTY.is_empty());
        assert_eq!(LayerSet::from(LayerKind::Icon), LayerSet::ICON);
    }

    #[test]
    fn new_stack_is_all_dirty_and_render_cleans() {
        let mut stack = LayerStack::new(small()).unwrap();
        assert_eq!(stack.dirty(), LayerSet::ALL);

        let (redrawn, failures) = render_dirty(&mut stack, &StyleState::default());
        assert_eq!(redrawn, LayerSet::ALL);
        assert!(failures.is_empty());
        assert!(stack.dirty().is_empty());
        assert_eq!(stack.layer(LayerKind::Background).version(), 1);

        stack.invalidate(LayerSet::BACKGROUND);
        let (redrawn, _) = render_dirty(&mut stack, &StyleState::default());
        assert_eq!(redrawn, LayerSet::BACKGROUND);
        assert_eq!(stack.layer(LayerKind::Background).version(), 2);
        assert_eq!(stack.layer(LayerKind::Watermark).version(), 1);
    }

    #[test]
    fn compose_respects_z_order() {
        let mut stack = LayerStack::new(small()).unwrap();
        stack.layers[LayerKind::Background.index()]
            .surface
            .fill(Color::from_rgb8(255, 0, 0));
        stack.layers[LayerKind::Icon.index()]
            .surface
            .fill(Color::from_rgb8(0, 0, 255));

        let mut dest = Surface::new(small()).unwrap();
        compose(&mut dest, &stack);
        assert_eq!(dest.pixel(10, 10), Some(Color::from_rgb8(0, 0, 255)));

        stack.layers[LayerKind::Watermark.index()]
            .surface
            .fill(Color::from_rgb8(0, 255, 0));
        compose(&mut dest, &stack);
        assert_eq!(dest.pixel(10, 10), Some(Color::from_rgb8(0, 255, 0)));
    }

    #[test]
    fn compose_over_fills_base() {
        let stack = LayerStack::new(small()).unwrap();
        let mut dest = Surface::new(small()).unwrap();
        compose_over(&mut dest, &stack, Color::WHITE);
        assert_eq!(dest.pixel(0, 0), Some(Color::WHITE));
        compose(&mut dest, &stack);
        assert!(dest.is_blank());
    }

    #[test]
    fn failed_layer_keeps_previous_content() {
        let mut stack = LayerStack::new(small()).unwrap();
        let mut style = StyleState::default();
        style.background.color = Color::from_rgb8(9, 9, 9);
        render_dirty(&mut stack, &style);

        style.background.mode = BackgroundMode::Image;
        style.background.image = Some(ImageCache::new().insert_bytes(vec![0u8]));
        stack.invalidate(LayerSet::BACKGROUND);

        let (redrawn, failures) = render_dirty(&mut stack, &style);
        assert!(redrawn.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(!stack.layer(LayerKind::Background).is_dirty());
        assert_eq!(
            stack.layer(LayerKind::Background).surface().pixel(5, 5),
            Some(Color::from_rgb8(9, 9, 9))
        );
    }

    #[test]
    fn images_needed_follows_dirty_set() {
        let mut cache = ImageCache::new();
        let mut style = StyleState::default();
        style.icon.image = Some(cache.insert_bytes(vec![1u8]));
        assert!(LayerStack::images_needed(&style, LayerSet::BACKGROUND).is_empty());
        assert_eq!(
            LayerStack::images_needed(&style, LayerSet::ALL),
            vec![style.icon.image.unwrap()]
        );
    }
}
