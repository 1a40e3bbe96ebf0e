//! Declarative, serializable style state for a cover image.
//!
//! A [`StyleState`] captures every visual parameter of the composition in a
//! JSON-friendly format. It is owned by a [`Composer`](crate::Composer) and
//! mutated only through the composer's setters, which know which layers each
//! field invalidates.
//!
//! All `*_px` values are authored against the reference resolution (the
//! preview canvas size) and are multiplied by the scale factor at render time.
//!
//! # Example
//!
//! ```
//! use cover_composer::{BackgroundMode, StyleState};
//!
//! let style = StyleState::default();
//! assert_eq!(style.background.mode, BackgroundMode::Color);
//!
//! let json = style.to_json().unwrap();
//! let restored = StyleState::from_json(&json).unwrap();
//! assert_eq!(restored.text.content, style.text.content);
//! ```

use std::fmt;
use std::str::FromStr;

use palette::Srgb;
use resvg::tiny_skia;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::GradientDirection;
use crate::image_cache::ImageHandle;

/// Text shown when the user clears the text field.
pub const DEFAULT_TEXT: &str = "阿懒同学";

/// Default watermark caption.
pub const DEFAULT_WATERMARK: &str = "@阿懒同学";

/// Icon border width in reference pixels.
pub const ICON_BORDER_PX: f32 = 20.0;

/// Icon corner radius in reference pixels.
pub const ICON_CORNER_RADIUS_PX: f32 = 30.0;

/// Watermark font size in reference pixels.
pub const WATERMARK_FONT_SIZE_PX: f32 = 14.0;

// ============================================================================
// Color
// ============================================================================

/// Error returned when a color string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid color: {0:?}")]
pub struct ColorParseError(pub String);

/// A straight-alpha RGBA color.
///
/// Serializes as a CSS hex string (`#rrggbb`, or `#rrggbbaa` when not opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self::from_rgba8(255, 255, 255, 255);
    pub const BLACK: Self = Self::from_rgba8(0, 0, 0, 255);
    pub const TRANSPARENT: Self = Self::from_rgba8(0, 0, 0, 0);

    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::from_rgba8(r, g, b, 255)
    }

    /// Parses `#rgb`, `#rrggbb`, `#rrggbbaa` or `transparent`.
    pub fn parse(value: &str) -> Result<Self, ColorParseError> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("transparent") {
            return Ok(Self::TRANSPARENT);
        }

        let hex = trimmed.trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(ColorParseError(value.to_string()));
        }
        let (rgb_part, alpha) = if hex.len() == 8 {
            let alpha = u8::from_str_radix(&hex[6..], 16)
                .map_err(|_| ColorParseError(value.to_string()))?;
            (&hex[..6], alpha)
        } else {
            (hex, 255)
        };

        let rgb: Srgb<u8> = rgb_part
            .parse()
            .map_err(|_| ColorParseError(value.to_string()))?;
        Ok(Self::from_rgba8(rgb.red, rgb.green, rgb.blue, alpha))
    }

    /// Returns the same color with a different alpha.
    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 255
    }

    pub fn to_hex(&self) -> String {
        if self.is_opaque() {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

// ============================================================================
// Background
// ============================================================================

/// Which source paints the background layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    #[default]
    Color,
    Gradient,
    Image,
}

/// Background layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundStyle {
    pub mode: BackgroundMode,
    pub color: Color,
    pub gradient_start: Color,
    pub gradient_end: Color,

    /// Gradient angle in degrees, normalized to `[0, 360)`.
    ///
    /// 0° points up, 90° right, 180° down, 270° left.
    pub gradient_angle: f32,

    /// Legacy named direction. When present it wins over the angle.
    ///
    /// Unrecognized names deserialize as `None`.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_direction"
    )]
    pub gradient_direction: Option<GradientDirection>,

    /// Background bitmap, only meaningful in [`BackgroundMode::Image`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageHandle>,

    /// Gaussian blur radius applied to the background image.
    pub blur_radius: f32,
}

impl Default for BackgroundStyle {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::Color,
            color: Color::WHITE,
            gradient_start: Color::from_rgb8(0x3b, 0x82, 0xf6),
            gradient_end: Color::from_rgb8(0x8b, 0x5c, 0xf6),
            gradient_angle: 135.0,
            gradient_direction: None,
            image: None,
            blur_radius: 3.0,
        }
    }
}

// ============================================================================
// Text
// ============================================================================

/// Centered text block settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    /// Text content; lines are separated by `\n`.
    pub content: String,
    pub color: Color,
    pub size_px: f32,
    pub line_height: f32,

    /// Strength of the 3-D drop shadow. 0 disables it.
    pub depth_px: f32,

    /// Custom font family. Empty means the ambient font.
    pub font_name: String,
}

impl TextStyle {
    pub fn has_multiple_lines(&self) -> bool {
        self.content.contains('\n')
    }
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            content: DEFAULT_TEXT.to_string(),
            color: Color::from_rgb8(0xee, 0xee, 0xee),
            size_px: 200.0,
            line_height: 1.0,
            depth_px: 0.0,
            font_name: String::new(),
        }
    }
}

// ============================================================================
// Icon
// ============================================================================

/// Drop shadow cast by the icon tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadowStyle {
    pub color: Color,
    pub blur_px: f32,
    pub offset_x_px: f32,
    pub offset_y_px: f32,
}

impl Default for ShadowStyle {
    fn default() -> Self {
        Self {
            color: Color::from_rgb8(0x64, 0x64, 0x64),
            blur_px: 120.0,
            offset_x_px: 1.0,
            offset_y_px: 1.0,
        }
    }
}

/// Rounded, shadowed icon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IconStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageHandle>,

    /// Total tile size, border included.
    pub size_px: f32,
    pub rotation_degrees: f32,

    /// Always [`ICON_CORNER_RADIUS_PX`]. Written to JSON, never read from it.
    #[serde(skip_deserializing)]
    pub corner_radius_px: f32,
    /// Always [`ICON_BORDER_PX`]. Written to JSON, never read from it.
    #[serde(skip_deserializing)]
    pub border_width_px: f32,

    /// Outward expansion of the colored plate behind the image. 0 disables it.
    pub background_padding_px: f32,
    pub background_color: Color,
    pub shadow: ShadowStyle,
}

impl Default for IconStyle {
    fn default() -> Self {
        Self {
            image: None,
            size_px: 300.0,
            rotation_degrees: 0.0,
            corner_radius_px: ICON_CORNER_RADIUS_PX,
            border_width_px: ICON_BORDER_PX,
            background_padding_px: 0.0,
            background_color: Color::from_rgb8(0xee, 0xee, 0xee),
            shadow: ShadowStyle::default(),
        }
    }
}

// ============================================================================
// Watermark
// ============================================================================

/// Bottom-right italic caption settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatermarkStyle {
    pub text: String,
    pub color: Color,
    /// Always [`WATERMARK_FONT_SIZE_PX`]. Written to JSON, never read from it.
    #[serde(skip_deserializing)]
    pub font_size_px: f32,
}

impl Default for WatermarkStyle {
    fn default() -> Self {
        Self {
            text: DEFAULT_WATERMARK.to_string(),
            color: Color::from_rgb8(0xdd, 0xdd, 0xdd),
            font_size_px: WATERMARK_FONT_SIZE_PX,
        }
    }
}

// ============================================================================
// Export
// ============================================================================

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Webp,
    Png,
    Jpeg,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

/// Export target settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    pub format: ExportFormat,

    /// Encoder quality in `[0, 1]`.
    pub quality: f32,
    pub target_width: u32,
    pub target_height: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ExportFormat::Webp,
            quality: 0.95,
            target_width: 1920,
            target_height: 1080,
            file_name: None,
        }
    }
}

// ============================================================================
// Font options
// ============================================================================

/// An imported font record, as kept by the font import feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedFont {
    pub name: String,
    pub source_url: String,
}

/// One entry of the font selection menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontOption {
    /// Family name handed to the renderer. Empty selects the ambient font.
    pub value: String,
    pub label: String,
}

impl FontOption {
    fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
        }
    }
}

/// Built-in font menu entries.
pub fn default_font_options() -> Vec<FontOption> {
    vec![
        FontOption::new("", "默认字体"),
        FontOption::new("Microsoft YaHei", "微软雅黑"),
        FontOption::new("Arial", "Arial"),
        FontOption::new("sans-serif", "Sans Serif"),
    ]
}

/// Built-in font menu entries followed by one entry per imported font.
pub fn font_options_with_imported(imported: &[ImportedFont]) -> Vec<FontOption> {
    let mut options = default_font_options();
    options.extend(
        imported
            .iter()
            .map(|font| FontOption::new(&font.name, &font.name)),
    );
    options
}

// ============================================================================
// StyleState
// ============================================================================

/// The complete style of a cover image.
///
/// # JSON Format
///
/// ```json
/// {
///   "background": { "mode": "gradient", "gradientAngle": 135.0, ... },
///   "text": { "content": "Hello", "sizePx": 200.0, ... },
///   "icon": { "sizePx": 300.0, ... },
///   "watermark": { "text": "@me", ... },
///   "export": { "format": "webp", "quality": 0.95, ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleState {
    pub background: BackgroundStyle,
    pub text: TextStyle,
    pub icon: IconStyle,
    pub watermark: WatermarkStyle,
    pub export: ExportSettings,
}

impl StyleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings a deserialized state back within its invariants.
    ///
    /// Angles are wrapped into `[0, 360)`, sizes clamped non-negative,
    /// quality clamped into `[0, 1]`, target dimensions to at least 1, and
    /// the background image is dropped unless the mode is `image`.
    pub fn normalized(mut self) -> Self {
        let bg = &mut self.background;
        bg.gradient_angle = normalize_angle(bg.gradient_angle);
        bg.blur_radius = non_negative(bg.blur_radius);
        if bg.mode != BackgroundMode::Image {
            bg.image = None;
        }

        let text = &mut self.text;
        text.size_px = non_negative(text.size_px);
        text.line_height = non_negative(text.line_height);
        text.depth_px = non_negative(text.depth_px);

        let icon = &mut self.icon;
        icon.size_px = non_negative(icon.size_px);
        icon.corner_radius_px = ICON_CORNER_RADIUS_PX;
        icon.border_width_px = ICON_BORDER_PX;
        icon.background_padding_px = non_negative(icon.background_padding_px);
        icon.shadow.blur_px = non_negative(icon.shadow.blur_px);

        self.watermark.font_size_px = WATERMARK_FONT_SIZE_PX;

        let export = &mut self.export;
        export.quality = clamp_quality(export.quality);
        export.target_width = export.target_width.max(1);
        export.target_height = export.target_height.max(1);

        self
    }

    /// Serializes the style to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes the style to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserializes a style from a JSON string, normalizing it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(json).map(Self::normalized)
    }
}

/// Wraps an angle into `[0, 360)`.
pub fn normalize_angle(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

fn lenient_direction<'de, D>(deserializer: D) -> Result<Option<GradientDirection>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = Option::<String>::deserialize(deserializer)?;
    Ok(name.as_deref().and_then(GradientDirection::from_name))
}

pub(crate) fn non_negative(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub(crate) fn clamp_quality(quality: f32) -> f32 {
    if quality.is_finite() {
        quality.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parses_hex_forms() {
        assert_eq!(Color::parse("#ffffff").unwrap(), Color::WHITE);
        assert_eq!(Color::parse("#fff").unwrap(), Color::WHITE);
        assert_eq!(
            Color::parse("#3b82f6").unwrap(),
            Color::from_rgb8(0x3b, 0x82, 0xf6)
        );
        assert_eq!(
            Color::parse("#00000066").unwrap(),
            Color::from_rgba8(0, 0, 0, 0x66)
        );
        assert_eq!(Color::parse("transparent").unwrap(), Color::TRANSPARENT);
        assert!(Color::parse("not-a-color").is_err());
    }

    #[test]
    fn unknown_gradient_direction_falls_back_to_angle() {
        let style = StyleState::from_json(
            r#"{ "background": { "gradientAngle": 90, "gradientDirection": "sideways" } }"#,
        )
        .unwrap();
        assert_eq!(style.background.gradient_direction, None);
        assert_eq!(style.background.gradient_angle, 90.0);

        let style =
            StyleState::from_json(r#"{ "background": { "gradientDirection": "to top left" } }"#)
                .unwrap();
        assert_eq!(
            style.background.gradient_direction,
            Some(GradientDirection::ToTopLeft)
        );
    }

    #[test]
    fn fixed_icon_and_watermark_metrics_ignore_json() {
        let style = StyleState::from_json(
            r#"{ "icon": { "borderWidthPx": 5, "cornerRadiusPx": 0 }, "watermark": { "fontSizePx": 40 } }"#,
        )
        .unwrap();
        assert_eq!(style.icon.border_width_px, ICON_BORDER_PX);
        assert_eq!(style.icon.corner_radius_px, ICON_CORNER_RADIUS_PX);
        assert_eq!(style.watermark.font_size_px, WATERMARK_FONT_SIZE_PX);

        let mut edited = StyleState::default();
        edited.icon.border_width_px = 1.0;
        edited.watermark.font_size_px = 99.0;
        let edited = edited.normalized();
        assert_eq!(edited.icon.border_width_px, ICON_BORDER_PX);
        assert_eq!(edited.watermark.font_size_px, WATERMARK_FONT_SIZE_PX);

        let json = StyleState::default().to_json().unwrap();
        assert!(json.contains("\"borderWidthPx\""));
    }

    #[test]
    fn color_serializes_as_hex() {
        let json = serde_json::to_string(&Color::from_rgb8(0x64, 0x64, 0x64)).unwrap();
        assert_eq!(json, "\"#646464\"");

        let translucent: Color = serde_json::from_str("\"#11223380\"").unwrap();
        assert_eq!(translucent.to_hex(), "#11223380");
    }

    #[test]
    fn defaults_match_editor() {
        let style = StyleState::default();
        assert_eq!(style.background.color, Color::WHITE);
        assert_eq!(style.text.content, DEFAULT_TEXT);
        assert_eq!(style.watermark.text, DEFAULT_WATERMARK);
        assert_eq!(style.icon.border_width_px, 20.0);
        assert_eq!(style.icon.corner_radius_px, 30.0);
        assert_eq!(style.watermark.font_size_px, 14.0);
        assert_eq!(style.export.format, ExportFormat::Webp);
        assert_eq!(style.export.quality, 0.95);
        assert_eq!(
            (style.export.target_width, style.export.target_height),
            (1920, 1080)
        );
    }

    #[test]
    fn style_json_format() {
        let json = StyleState::default().to_json_pretty().unwrap();

        assert!(json.contains("\"gradientAngle\""));
        assert!(json.contains("\"lineHeight\""));
        assert!(json.contains("\"backgroundPaddingPx\""));
        assert!(json.contains("\"mode\": \"color\""));
        assert!(!json.contains("\"image\""));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let style = StyleState::from_json(r##"{"text": {"content": "Hi"}}"##).unwrap();
        assert_eq!(style.text.content, "Hi");
        assert_eq!(style.text.size_px, 200.0);
        assert_eq!(style.watermark.text, DEFAULT_WATERMARK);
    }

    #[test]
    fn from_json_normalizes() {
        let json = r##"{
            "background": {"mode": "color", "gradientAngle": -90.0, "image": 7},
            "icon": {"sizePx": -5.0},
            "export": {"quality": 3.0, "targetWidth": 0}
        }"##;
        let style = StyleState::from_json(json).unwrap();

        assert_eq!(style.background.gradient_angle, 270.0);
        assert!(style.background.image.is_none());
        assert_eq!(style.icon.size_px, 0.0);
        assert_eq!(style.export.quality, 1.0);
        assert_eq!(style.export.target_width, 1);
    }

    #[test]
    fn normalize_angle_wraps() {
        assert_eq!(normalize_angle(0.0), 0.0);
        assert_eq!(normalize_angle(360.0), 0.0);
        assert_eq!(normalize_angle(450.0), 90.0);
        assert_eq!(normalize_angle(-45.0), 315.0);
        assert_eq!(normalize_angle(f32::NAN), 0.0);
        assert!(normalize_angle(-1e-9) < 360.0);
    }

    #[test]
    fn export_format_extensions() {
        assert_eq!(ExportFormat::Webp.extension(), "webp");
        assert_eq!(ExportFormat::Png.extension(), "png");
        assert_eq!(ExportFormat::Jpeg.extension(), "jpg");
        assert_eq!("JPG".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert!("gif".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn font_options_include_imported() {
        let imported = vec![ImportedFont {
            name: "LXGW WenKai".into(),
            source_url: "https://example.invalid/wenkai.css".into(),
        }];
        let options = font_options_with_imported(&imported);

        assert_eq!(options.len(), default_font_options().len() + 1);
        assert_eq!(options[0].value, "");
        assert_eq!(options.last().unwrap().value, "LXGW WenKai");
    }

    #[test]
    fn multiple_lines_detected() {
        let mut text = TextStyle::default();
        assert!(!text.has_multiple_lines());
        text.content = "a\nb".into();
        assert!(text.has_multiple_lines());
    }
}
