//! Cover composition engine with four cached layers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ComposeError, ComposeResult, ExportError};
use crate::export::{ExportArtifact, ExportPipeline, ExportRequest, encode_image_async};
use crate::font::{
    FontDbGate, FontLoadOutcome, FontLoadTicket, FontLoadTracker, FontReadinessGate,
    INTERACTIVE_FONT_TIMEOUT,
};
use crate::geometry::{DEFAULT_REFERENCE_SIZE, GradientDirection, ScaleFactor, SizePx};
use crate::image_cache::{ImageCache, ImageHandle};
use crate::layer::{LayerSet, LayerStack, RenderContext, compose, compose_over};
use crate::style::{
    BackgroundMode, Color, DEFAULT_TEXT, ExportSettings, ShadowStyle, StyleState, normalize_angle,
    non_negative,
};
use crate::surface::Surface;
use crate::text::{FontStack, TextEngine};

/// Font names that select the ambient family.
const DEFAULT_FONT_NAMES: [&str; 2] = ["", "default"];

// ============================================================================
// Configurable Trait
// ============================================================================

/// Trait for types that can be configured from a whole [`StyleState`].
pub trait Configurable {
    /// Replaces the current style, invalidating whatever changed.
    fn apply_style(&mut self, style: StyleState);

    /// Exports the current style.
    fn export_style(&self) -> StyleState;
}

// ============================================================================
// RenderReport
// ============================================================================

/// What one [`Composer::render`] call did.
#[derive(Debug, Default)]
pub struct RenderReport {
    /// Layers that were redrawn.
    pub redrawn: LayerSet,
    /// Layers that failed and kept their previous content.
    pub warnings: Vec<ComposeError>,
}

impl RenderReport {
    /// True if no layer failed.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

// ============================================================================
// Composer
// ============================================================================

/// Main cover composition engine.
///
/// `Composer` owns the [`StyleState`] and the four layer surfaces. Every
/// mutation goes through a named setter that returns whether anything
/// changed and marks the layers it affects as dirty. Nothing is drawn until
/// [`render`](Self::render) is called.
///
/// # Layer Pipeline
///
/// 1. **Background** - flat color, linear gradient, or blurred cover image
/// 2. **Text** - centered multi-line text with an optional 3-D shadow
/// 3. **Icon** - rounded, rotated tile with a drop shadow
/// 4. **Watermark** - italic caption in the bottom-right corner
///
/// Layers are redrawn independently. A layer that fails (for example a
/// background image that cannot be decoded) keeps its previous content and
/// is reported in [`RenderReport::warnings`].
///
/// # Example
///
/// ```no_run
/// use cover_composer::{Color, Composer, ExportRequest, TextEngine};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut composer = Composer::new(TextEngine::new())?;
/// composer.attach_preview()?;
///
/// composer.set_background_gradient(Color::parse("#3b82f6")?, Color::parse("#8b5cf6")?, 135.0);
/// composer.set_text("Hello\nWorld");
/// composer.render().await?;
///
/// let artifact = composer.export(ExportRequest::default()).await?;
/// artifact.save_to(".")?;
/// # Ok(())
/// # }
/// ```
pub struct Composer {
    style: StyleState,
    reference: SizePx,
    layers: LayerStack,
    preview: Option<Surface>,
    images: ImageCache,
    text: Arc<Mutex<TextEngine>>,
    fonts: FontLoadTracker,
    font_hint: Option<String>,
    font_unavailable: bool,
    exporter: ExportPipeline,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("reference", &self.reference)
            .field("dirty", &self.layers.dirty())
            .field("preview", &self.preview.is_some())
            .field("images", &self.images.len())
            .field("font_hint", &self.font_hint)
            .field("export_phase", &self.exporter.phase())
            .finish()
    }
}

impl Composer {
    /// Creates a composer with default style at the default reference size.
    ///
    /// All layers start dirty; call [`attach_preview`](Self::attach_preview)
    /// and [`render`](Self::render) to produce the first preview.
    pub fn new(text: TextEngine) -> ComposeResult<Self> {
        Self::with_reference_size(text, DEFAULT_REFERENCE_SIZE)
    }

    pub fn with_reference_size(text: TextEngine, reference: SizePx) -> ComposeResult<Self> {
        Ok(Self {
            style: StyleState::default(),
            reference,
            layers: LayerStack::new(reference)?,
            preview: None,
            images: ImageCache::new(),
            text: Arc::new(Mutex::new(text)),
            fonts: FontLoadTracker::new(),
            font_hint: None,
            font_unavailable: false,
            exporter: ExportPipeline::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn style(&self) -> &StyleState {
        &self.style
    }

    pub fn reference_size(&self) -> SizePx {
        self.reference
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// The composited preview, once attached.
    pub fn preview(&self) -> Option<&Surface> {
        self.preview.as_ref()
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// Shared handle to the text engine, for building a [`FontDbGate`].
    pub fn text_engine(&self) -> Arc<Mutex<TextEngine>> {
        Arc::clone(&self.text)
    }

    /// A readiness gate backed by this composer's font database.
    pub fn font_gate(&self) -> FontDbGate {
        FontDbGate::new(self.text_engine())
    }

    /// A handle observing this composer's export phase.
    pub fn export_pipeline(&self) -> ExportPipeline {
        self.exporter.clone()
    }

    fn engine(&self) -> MutexGuard<'_, TextEngine> {
        self.text.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Surfaces and resources
    // ------------------------------------------------------------------------

    /// Allocates the preview surface at the reference size.
    pub fn attach_preview(&mut self) -> ComposeResult<()> {
        self.preview = Some(Surface::new(self.reference)?);
        log::debug!(target: "composer", "preview attached at {:?}", self.reference);
        Ok(())
    }

    /// Changes the preview resolution; all layers are reallocated and dirty.
    pub fn set_reference_size(&mut self, size: SizePx) -> ComposeResult<()> {
        if size == self.reference {
            return Ok(());
        }
        self.layers.resize(size)?;
        if self.preview.is_some() {
            self.preview = Some(Surface::new(size)?);
        }
        self.reference = size;
        Ok(())
    }

    /// Registers encoded image bytes (PNG, JPEG, WebP, SVG...).
    ///
    /// Decoding is deferred to the next render or export.
    pub fn add_image(&mut self, bytes: impl Into<Arc<[u8]>>) -> ImageHandle {
        self.images.insert_bytes(bytes)
    }

    /// Registers a font file and returns the families it provides.
    pub fn load_font_data(&mut self, data: Vec<u8>) -> Vec<String> {
        let families = self.engine().load_font_data(data);
        if !families.is_empty() {
            self.layers.invalidate(LayerSet::TEXT | LayerSet::WATERMARK);
        }
        families
    }

    // ------------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------------

    /// Applies `edit` to a copy of the style and keeps it if it differs.
    fn update(&mut self, affected: LayerSet, edit: impl FnOnce(&mut StyleState)) -> bool {
        let mut next = self.style.clone();
        edit(&mut next);
        let next = next.normalized();
        if next == self.style {
            return false;
        }
        self.style = next;
        self.layers.invalidate(affected);
        true
    }

    /// Flat background color. Drops any background image.
    pub fn set_background_color(&mut self, color: Color) -> bool {
        self.update(LayerSet::BACKGROUND, |s| {
            s.background.mode = BackgroundMode::Color;
            s.background.color = color;
            s.background.image = None;
        })
    }

    /// Linear gradient at `angle` degrees. Drops any background image and
    /// any legacy named direction.
    pub fn set_background_gradient(&mut self, start: Color, end: Color, angle: f32) -> bool {
        self.update(LayerSet::BACKGROUND, |s| {
            s.background.mode = BackgroundMode::Gradient;
            s.background.gradient_start = start;
            s.background.gradient_end = end;
            s.background.gradient_angle = normalize_angle(angle);
            s.background.gradient_direction = None;
            s.background.image = None;
        })
    }

    /// Linear gradient along a legacy named direction.
    pub fn set_gradient_direction(&mut self, direction: GradientDirection) -> bool {
        self.update(LayerSet::BACKGROUND, |s| {
            s.background.mode = BackgroundMode::Gradient;
            s.background.gradient_direction = Some(direction);
            s.background.image = None;
        })
    }

    pub fn set_background_image(&mut self, image: ImageHandle) -> bool {
        self.update(LayerSet::BACKGROUND, |s| {
            s.background.mode = BackgroundMode::Image;
            s.background.image = Some(image);
        })
    }

    pub fn set_background_blur(&mut self, radius: f32) -> bool {
        self.update(LayerSet::BACKGROUND, |s| s.background.blur_radius = radius)
    }

    /// Text content; an empty string restores the default text.
    pub fn set_text(&mut self, content: &str) -> bool {
        let content = if content.is_empty() { DEFAULT_TEXT } else { content };
        self.update(LayerSet::TEXT, |s| s.text.content = content.to_string())
    }

    pub fn set_text_color(&mut self, color: Color) -> bool {
        self.update(LayerSet::TEXT, |s| s.text.color = color)
    }

    pub fn set_text_size(&mut self, size_px: f32) -> bool {
        self.update(LayerSet::TEXT, |s| s.text.size_px = size_px)
    }

    pub fn set_line_height(&mut self, multiplier: f32) -> bool {
        self.update(LayerSet::TEXT, |s| s.text.line_height = multiplier)
    }

    /// 3-D shadow depth; zero disables the shadow.
    pub fn set_text_depth(&mut self, depth_px: f32) -> bool {
        self.update(LayerSet::TEXT, |s| s.text.depth_px = depth_px)
    }

    /// Icon bitmap; `None` removes the icon.
    pub fn set_icon_image(&mut self, image: Option<ImageHandle>) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.image = image)
    }

    pub fn set_icon_size(&mut self, size_px: f32) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.size_px = size_px)
    }

    pub fn set_icon_rotation(&mut self, degrees: f32) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.rotation_degrees = degrees)
    }

    pub fn set_icon_background_padding(&mut self, padding_px: f32) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.background_padding_px = padding_px)
    }

    pub fn set_icon_background_color(&mut self, color: Color) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.background_color = color)
    }

    pub fn set_icon_shadow(&mut self, shadow: ShadowStyle) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.shadow = shadow)
    }

    pub fn set_shadow_color(&mut self, color: Color) -> bool {
        self.update(LayerSet::ICON, |s| s.icon.shadow.color = color)
    }

    /// Centered glow with a blur of twice `strength`.
    pub fn set_shadow_strength(&mut self, strength: f32) -> bool {
        let strength = non_negative(strength);
        self.update(LayerSet::ICON, |s| s.icon.set_shadow_strength(strength))
    }

    pub fn set_watermark(&mut self, text: &str) -> bool {
        self.update(LayerSet::WATERMARK, |s| s.watermark.text = text.to_string())
    }

    pub fn set_watermark_color(&mut self, color: Color) -> bool {
        self.update(LayerSet::WATERMARK, |s| s.watermark.color = color)
    }

    /// Export defaults; no layer depends on them.
    pub fn set_export_settings(&mut self, settings: ExportSettings) -> bool {
        self.update(LayerSet::EMPTY, |s| s.export = settings)
    }

    // ------------------------------------------------------------------------
    // Fonts
    // ------------------------------------------------------------------------

    /// The hint shown after the last font change failed, if any.
    pub fn font_hint(&self) -> Option<&str> {
        self.font_hint.as_deref()
    }

    /// True while a font change is waiting for its font.
    pub fn is_font_loading(&self) -> bool {
        self.fonts.is_loading()
    }

    /// The families text and watermark are drawn with right now.
    ///
    /// Falls back to the ambient family alone when no font is selected or
    /// the selected one did not load.
    pub fn effective_font_stack(&self) -> FontStack {
        let engine = self.engine();
        self.font_stack(engine.ambient_family())
    }

    fn font_stack(&self, ambient: &str) -> FontStack {
        if self.font_unavailable {
            return FontStack::ambient(ambient);
        }
        FontStack::new(Some(self.style.text.font_name.as_str()), ambient)
    }

    /// Selects `name` immediately and starts a load.
    ///
    /// Text and watermark are invalidated right away so the next render uses
    /// the new font (or the ambient one while it loads).
    pub fn begin_font_change(&mut self, name: &str) -> FontLoadTicket {
        let name = name.trim();
        let name = if DEFAULT_FONT_NAMES.contains(&name) { "" } else { name };

        log::info!(target: "fonts", "selecting font \"{}\"", name);
        self.style.text.font_name = name.to_string();
        self.font_hint = None;
        self.font_unavailable = false;
        self.layers.invalidate(LayerSet::TEXT | LayerSet::WATERMARK);
        self.fonts.begin(name)
    }

    /// Applies the outcome of a load started with
    /// [`begin_font_change`](Self::begin_font_change).
    ///
    /// Returns false, changing nothing, if a newer change superseded it.
    pub fn finish_font_change(&mut self, ticket: &FontLoadTicket, outcome: FontLoadOutcome) -> bool {
        if !self.fonts.complete(ticket) {
            return false;
        }

        match outcome.hint() {
            Some(hint) => {
                log::warn!(target: "fonts", "font \"{}\" unavailable ({:?}), using the ambient family", ticket.font(), outcome);
                self.font_hint = Some(hint.to_string());
                self.font_unavailable = true;
            }
            None => {
                self.font_hint = None;
                self.font_unavailable = false;
            }
        }
        self.layers.invalidate(LayerSet::TEXT | LayerSet::WATERMARK);
        true
    }

    /// Selects `name`, waits up to one second for it, and re-renders.
    pub async fn change_font<G: FontReadinessGate>(
        &mut self,
        gate: &G,
        name: &str,
    ) -> ComposeResult<RenderReport> {
        let ticket = self.begin_font_change(name);
        let outcome = wait_for_font(gate, ticket.font()).await;
        self.finish_font_change(&ticket, outcome);
        self.render().await
    }

    /// Prepares the first preview.
    ///
    /// Attaches the preview if needed, waits for the selected font (if any),
    /// then redraws every layer.
    pub async fn initialize<G: FontReadinessGate>(&mut self, gate: &G) -> ComposeResult<RenderReport> {
        if self.preview.is_none() {
            self.attach_preview()?;
        }
        let name = self.style.text.font_name.clone();
        let ticket = self.begin_font_change(&name);
        let outcome = wait_for_font(gate, ticket.font()).await;
        self.finish_font_change(&ticket, outcome);

        self.layers.invalidate(LayerSet::ALL);
        self.render().await
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Redraws dirty layers, then composites the preview.
    ///
    /// Images referenced by dirty layers are decoded first. A layer that
    /// fails keeps its previous content; the preview is composited anyway.
    pub async fn render(&mut self) -> ComposeResult<RenderReport> {
        if self.preview.is_none() {
            log::error!(target: "composer", "render called before the preview was attached");
            return Err(ComposeError::CanvasNotInitialized);
        }

        let report = self.redraw_dirty().await;
        if let Some(preview) = self.preview.as_mut() {
            compose(preview, &self.layers);
        }
        Ok(report)
    }

    async fn redraw_dirty(&mut self) -> RenderReport {
        let dirty = self.layers.dirty();
        if dirty.is_empty() {
            return RenderReport::default();
        }
        self.decode_images(LayerSet::ALL).await;

        let mut engine = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        let font = self.font_stack(engine.ambient_family());
        let mut ctx = RenderContext {
            scale: ScaleFactor::IDENTITY,
            text: &mut *engine,
            font: &font,
            images: &self.images,
        };
        let (redrawn, warnings) = self.layers.render_dirty(&self.style, &mut ctx);
        log::debug!(target: "composer", "redrew {:?}, {} warning(s)", redrawn, warnings.len());
        RenderReport { redrawn, warnings }
    }

    /// Decodes every image the layers in `set` reference.
    ///
    /// Failures are remembered by the cache and surface when the layer
    /// renders.
    async fn decode_images(&mut self, set: LayerSet) {
        for handle in LayerStack::images_needed(&self.style, set) {
            let _ = self.images.ensure_decoded(handle).await;
        }
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Exports with the style's own export settings.
    pub async fn export_current(&mut self) -> Result<ExportArtifact, ExportError> {
        let request = ExportRequest::from(&self.style.export);
        self.export(request).await
    }

    /// Renders the cover at the requested size and encodes it.
    ///
    /// At the reference size the preview layers are reused; any other size
    /// renders four fresh layers with every pixel quantity scaled by the
    /// smaller of the width and height ratios to the reference. The result is composited over
    /// opaque white. Rejected with [`ExportError::Busy`] while another
    /// export holds the pipeline.
    pub async fn export(&mut self, request: ExportRequest) -> Result<ExportArtifact, ExportError> {
        let guard = self.exporter.try_begin()?;

        let target = request.size();
        if target.is_empty() {
            return Err(ComposeError::InvalidDimensions {
                width: target.width,
                height: target.height,
            }
            .into());
        }
        let scale = ScaleFactor::resolve(target, self.reference);
        log::info!(
            target: "export",
            "exporting {}x{} {} at scale {}",
            target.width,
            target.height,
            request.format.extension(),
            scale.get()
        );

        let mut output = Surface::new(target)?;
        if target == self.reference {
            self.render_for_export_fast(&mut output).await?;
        } else {
            self.render_for_export_scaled(&mut output, scale).await?;
        }

        guard.encoding();
        let bytes = encode_image_async(output.to_rgba_image(), request.format, request.quality).await?;
        let artifact = ExportArtifact {
            file_name: request.resolved_file_name(),
            format: request.format,
            bytes,
            width: target.width,
            height: target.height,
            scale,
        };
        guard.finish();
        log::info!(target: "export", "exported {} ({} bytes)", artifact.file_name, artifact.bytes.len());
        Ok(artifact)
    }

    /// Reuses the preview layers, redrawing the dirty ones.
    async fn render_for_export_fast(&mut self, output: &mut Surface) -> Result<(), ExportError> {
        let report = self.redraw_dirty().await;
        if let Some(preview) = self.preview.as_mut() {
            compose(preview, &self.layers);
        }
        if let Some(err) = report.warnings.into_iter().next() {
            return Err(err.into());
        }
        // Layers that failed earlier kept stale content and are no longer dirty.
        for handle in LayerStack::images_needed(&self.style, LayerSet::ALL) {
            self.images.bitmap(handle)?;
        }
        compose_over(output, &self.layers, Color::WHITE);
        Ok(())
    }

    /// Renders four fresh layers at the output size.
    async fn render_for_export_scaled(
        &mut self,
        output: &mut Surface,
        scale: ScaleFactor,
    ) -> Result<(), ExportError> {
        let style = self.style.clone();
        let mut layers = LayerStack::new(output.size())?;
        self.decode_images(LayerSet::ALL).await;

        {
            let mut engine = self.text.lock().unwrap_or_else(PoisonError::into_inner);
            let font = self.font_stack(engine.ambient_family());
            let mut ctx = RenderContext {
                scale,
                text: &mut *engine,
                font: &font,
                images: &self.images,
            };
            layers.render_all(&style, &mut ctx)?;
        }
        compose_over(output, &layers, Color::WHITE);
        Ok(())
    }
}

/// Waits for `name` with the interactive timeout; the ambient font is
/// always ready.
async fn wait_for_font<G: FontReadinessGate>(gate: &G, name: &str) -> FontLoadOutcome {
    if name.is_empty() {
        return FontLoadOutcome::Ready;
    }
    gate.force_load(name);
    FontLoadOutcome::from_ready(gate.wait_for_ready(name, INTERACTIVE_FONT_TIMEOUT).await)
}

impl Configurable for Composer {
    /// Replaces the style, invalidating only the layers whose section
    /// changed. A different font name is selected without waiting for it.
    fn apply_style(&mut self, style: StyleState) {
        let style = style.normalized();
        let mut affected = LayerSet::EMPTY;
        if style.background != self.style.background {
            affected |= LayerSet::BACKGROUND;
        }
        if style.text != self.style.text {
            affected |= LayerSet::TEXT;
        }
        if style.icon != self.style.icon {
            affected |= LayerSet::ICON;
        }
        if style.watermark != self.style.watermark {
            affected |= LayerSet::WATERMARK;
        }
        if style.text.font_name != self.style.text.font_name {
            self.fonts.supersede();
            self.font_hint = None;
            self.font_unavailable = false;
            affected |= LayerSet::TEXT | LayerSet::WATERMARK;
        }

        self.style = style;
        self.layers.invalidate(affected);
    }

    fn export_style(&self) -> StyleState {
        self.style.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
