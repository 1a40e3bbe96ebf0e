//! cover-composer: layered cover image composition
//!
//! This crate composes a cover image from four stacked layers (background,
//! text, icon and watermark) and exports it as WebP, PNG or JPEG at any
//! resolution. Every pixel quantity is authored against a reference
//! resolution and scaled at export time, so a 4K export looks exactly like
//! the preview, only sharper.
//!
//! # Example
//!
//! ```
//! use cover_composer::{Color, Composer, ExportFormat, ExportRequest, TextEngine};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let mut composer = Composer::new(TextEngine::empty()).unwrap();
//! composer.attach_preview().unwrap();
//!
//! // Setters mark the layers they affect as dirty
//! composer.set_background_color(Color::parse("#1e293b").unwrap());
//! composer.set_text("Hello");
//!
//! // One render step redraws dirty layers and composites the preview
//! let report = composer.render().await.unwrap();
//! assert!(report.is_clean());
//!
//! let artifact = composer
//!     .export(ExportRequest {
//!         format: ExportFormat::Png,
//!         width: 3840,
//!         height: 2160,
//!         ..ExportRequest::default()
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(artifact.scale.get(), 2.0);
//! # });
//! ```
//!
//! # Serializable Styles
//!
//! The whole composition is described by a [`StyleState`], which can be
//! applied and exported through the [`Configurable`] trait:
//!
//! ```
//! use cover_composer::{Composer, Configurable, StyleState, TextEngine};
//!
//! let mut composer = Composer::new(TextEngine::empty()).unwrap();
//!
//! let style = StyleState::from_json(r#"{ "text": { "content": "Hi" } }"#).unwrap();
//! composer.apply_style(style);
//!
//! let json = composer.export_style().to_json().unwrap();
//! assert!(json.contains("\"Hi\""));
//! ```

mod composer;
mod error;
mod export;
mod font;
mod geometry;
mod image_cache;
mod layer;
mod style;
mod surface;
mod text;

pub use composer::{Composer, Configurable, RenderReport};
pub use error::{ComposeError, ComposeResult, ExportError};
pub use export::{
    ExportArtifact, ExportGuard, ExportPhase, ExportPipeline, ExportRequest, default_file_name,
    encode_image, encode_image_async, jpeg_quality, webp_quality,
};
pub use font::{
    FONT_FAILED_HINT, FONT_POLL_INTERVAL, FONT_TIMEOUT_HINT, FontDbGate, FontLoadOutcome,
    FontLoadTicket, FontLoadTracker, FontReadinessGate, INTERACTIVE_FONT_TIMEOUT,
    PRELOAD_FONT_TIMEOUT, preload_fonts,
};
pub use geometry::{
    DEFAULT_REFERENCE_SIZE, GradientAxis, GradientDirection, ScaleFactor, SizePx, gradient_axis,
};
pub use image_cache::{ImageCache, ImageHandle};
pub use layer::{
    IconGeometry, Layer, LayerKind, LayerRenderer, LayerSet, LayerStack, RenderContext,
    TextLayout, compose, compose_over, icon_geometry, text_layout, watermark_anchor,
};
pub use style::{
    BackgroundMode, BackgroundStyle, Color, ColorParseError, DEFAULT_TEXT, DEFAULT_WATERMARK,
    ExportFormat, ExportSettings, FontOption, ICON_BORDER_PX, ICON_CORNER_RADIUS_PX, IconStyle,
    ImportedFont, ShadowStyle, StyleState, TextStyle, WATERMARK_FONT_SIZE_PX, WatermarkStyle,
    default_font_options, font_options_with_imported, normalize_angle,
};
pub use surface::{DropShadow, MAX_DIMENSION, Surface};
pub use text::{AMBIENT_FAMILY, FontSpec, FontStack, TextAlign, TextBaseline, TextEngine};
