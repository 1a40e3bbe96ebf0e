//! Text shaping and rasterization using cosmic-text.
//!
//! Glyphs are rendered as vector outlines filled through tiny-skia, so text
//! scales cleanly to any export resolution.

use std::sync::Arc;

use cosmic_text::fontdb::{Database, Source};
use cosmic_text::{
    Attrs, Buffer, CacheKeyFlags, Command, Family, FontSystem, Metrics, Shaping, Style,
    SwashCache, Weight,
};
use resvg::tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};

use crate::style::Color;

/// Generic family used when no custom font is selected or available.
pub const AMBIENT_FAMILY: &str = "sans-serif";

const LOCALE: &str = "en";

/// Horizontal anchor of a line of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Vertical anchor of a line of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextBaseline {
    #[default]
    Alphabetic,
    Middle,
}

/// Horizontal offset from the anchor to the start of the line.
pub fn text_x_offset(width: f32, align: TextAlign) -> f32 {
    match align {
        TextAlign::Left => 0.0,
        TextAlign::Center => -width / 2.0,
        TextAlign::Right => -width,
    }
}

/// Vertical offset from the anchor to the alphabetic baseline.
pub fn text_y_offset(font_size: f32, baseline: TextBaseline) -> f32 {
    let ascent = font_size * 0.8;
    let descent = font_size * 0.2;

    match baseline {
        TextBaseline::Alphabetic => 0.0,
        TextBaseline::Middle => ascent / 2.0 - descent / 2.0,
    }
}

// ============================================================================
// Font stack
// ============================================================================

/// Ordered list of font families, most preferred first.
///
/// The last entry is always the ambient family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontStack {
    families: Vec<String>,
}

impl FontStack {
    /// A stack holding only the ambient family.
    pub fn ambient(ambient: &str) -> Self {
        Self {
            families: vec![ambient.to_string()],
        }
    }

    /// A stack preferring `custom` over `ambient`. Empty names are ignored.
    pub fn new(custom: Option<&str>, ambient: &str) -> Self {
        let mut families = Vec::with_capacity(2);
        if let Some(name) = custom.map(str::trim).filter(|n| !n.is_empty()) {
            families.push(name.to_string());
        }
        families.push(ambient.to_string());
        Self { families }
    }

    pub fn families(&self) -> &[String] {
        &self.families
    }

    pub fn is_ambient_only(&self) -> bool {
        self.families.len() == 1
    }

    /// CSS `font-family` form: `"My Font", sans-serif`.
    ///
    /// Names containing a space or hyphen are quoted, except generic
    /// families.
    pub fn css(&self) -> String {
        self.families
            .iter()
            .map(|name| {
                if !is_generic(name) && name.contains([' ', '-']) {
                    format!("\"{name}\"")
                } else {
                    name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn is_generic(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "sans-serif" | "serif" | "monospace" | "cursive" | "fantasy"
    )
}

fn family_of(name: &str) -> Family<'_> {
    match name.to_ascii_lowercase().as_str() {
        "sans-serif" => Family::SansSerif,
        "serif" => Family::Serif,
        "monospace" => Family::Monospace,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        _ => Family::Name(name),
    }
}

/// A resolved font request: one stack at a size, weight and slant.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec<'a> {
    pub stack: &'a FontStack,
    pub size_px: f32,
    pub weight: u16,
    pub italic: bool,
}

// ============================================================================
// Text engine
// ============================================================================

/// Owns the font database, shaper and glyph outline cache.
pub struct TextEngine {
    font_system: FontSystem,
    swash_cache: SwashCache,
    ambient_family: String,
}

impl std::fmt::Debug for TextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEngine")
            .field("faces", &self.font_system.db().len())
            .field("ambient_family", &self.ambient_family)
            .finish()
    }
}

impl TextEngine {
    /// Creates an engine over the system fonts.
    pub fn new() -> Self {
        let font_system = FontSystem::new();
        log::debug!(target: "text", "loaded {} system font faces", font_system.db().len());
        Self::from_font_system(font_system)
    }

    /// Creates an engine over an explicit font database.
    pub fn with_database(db: Database) -> Self {
        Self::from_font_system(FontSystem::new_with_locale_and_db(LOCALE.to_string(), db))
    }

    /// Creates an engine with no fonts. Text renders as nothing.
    pub fn empty() -> Self {
        Self::with_database(Database::new())
    }

    fn from_font_system(font_system: FontSystem) -> Self {
        Self {
            font_system,
            swash_cache: SwashCache::new(),
            ambient_family: AMBIENT_FAMILY.to_string(),
        }
    }

    /// Overrides the family used when nothing else resolves.
    pub fn with_ambient_family(mut self, family: impl Into<String>) -> Self {
        self.ambient_family = family.into();
        self
    }

    pub fn ambient_family(&self) -> &str {
        &self.ambient_family
    }

    pub fn face_count(&self) -> usize {
        self.font_system.db().len()
    }

    /// Registers a font file (TTF, OTF, TTC) and returns the family names it
    /// added.
    pub fn load_font_data(&mut self, data: Vec<u8>) -> Vec<String> {
        let ids = self
            .font_system
            .db_mut()
            .load_font_source(Source::Binary(Arc::new(data)));

        let db = self.font_system.db();
        let mut names: Vec<String> = ids
            .iter()
            .filter_map(|id| db.face(*id))
            .filter_map(|face| face.families.first().map(|(name, _)| name.clone()))
            .collect();
        names.dedup();
        log::info!(target: "text", "registered font families {:?}", names);
        names
    }

    /// Returns true if the database can serve `name`.
    pub fn has_family(&self, name: &str) -> bool {
        let db = self.font_system.db();
        if db.len() == 0 {
            return false;
        }
        if is_generic(name) {
            return true;
        }
        db.faces().any(|face| {
            face.families
                .iter()
                .any(|(family, _)| family.eq_ignore_ascii_case(name))
        })
    }

    /// Picks the first family in the stack the database can serve.
    pub fn resolve_family<'s>(&self, stack: &'s FontStack) -> &'s str {
        stack
            .families()
            .iter()
            .find(|name| self.has_family(name))
            .or_else(|| stack.families().last())
            .map(String::as_str)
            .unwrap_or(AMBIENT_FAMILY)
    }

    fn shape(&mut self, text: &str, font: &FontSpec<'_>) -> Option<Buffer> {
        if self.face_count() == 0 || text.is_empty() || font.size_px <= 0.0 {
            return None;
        }

        let family = self.resolve_family(font.stack).to_string();
        let metrics = Metrics::new(font.size_px, font.size_px * 1.2);
        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        let attrs = Attrs::new()
            .family(family_of(&family))
            .weight(Weight(font.weight))
            .style(if font.italic { Style::Italic } else { Style::Normal })
            .cache_key_flags(CacheKeyFlags::DISABLE_HINTING);

        buffer.set_text(&mut self.font_system, text, &attrs, Shaping::Advanced, None);
        buffer.shape_until_scroll(&mut self.font_system, false);
        Some(buffer)
    }

    /// Measures the advance width of a single line.
    pub fn measure_width(&mut self, text: &str, font: &FontSpec<'_>) -> f32 {
        self.shape(text, font)
            .map(|buffer| {
                buffer
                    .layout_runs()
                    .fold(0.0_f32, |width, run| width.max(run.line_w))
            })
            .unwrap_or(0.0)
    }

    /// Fills one line of text anchored at `(x, y)`.
    #[allow(clippy::too_many_arguments)]
    pub fn fill_line(
        &mut self,
        pixmap: &mut Pixmap,
        text: &str,
        x: f32,
        y: f32,
        font: &FontSpec<'_>,
        color: Color,
        align: TextAlign,
        baseline: TextBaseline,
    ) {
        let Some(buffer) = self.shape(text, font) else {
            return;
        };
        log::trace!(target: "text", "fill \"{}\" at {} {}", text, x, y);

        let width = buffer
            .layout_runs()
            .fold(0.0_f32, |width, run| width.max(run.line_w));
        let base_x = x + text_x_offset(width, align);
        let base_y = y + text_y_offset(font.size_px, baseline);

        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint.anti_alias = true;

        for run in buffer.layout_runs() {
            for glyph in run.glyphs.iter() {
                let physical = glyph.physical((base_x, base_y), 1.0);
                let glyph_x = base_x + glyph.x + glyph.font_size * glyph.x_offset;
                let glyph_y = base_y + glyph.y - glyph.font_size * glyph.y_offset;

                let Some(commands) = self
                    .swash_cache
                    .get_outline_commands(&mut self.font_system, physical.cache_key)
                else {
                    continue;
                };

                // Font outlines are y-up.
                let mut pb = PathBuilder::new();
                for cmd in commands {
                    match cmd {
                        Command::MoveTo(p) => pb.move_to(p.x, -p.y),
                        Command::LineTo(p) => pb.line_to(p.x, -p.y),
                        Command::QuadTo(c, p) => pb.quad_to(c.x, -c.y, p.x, -p.y),
                        Command::CurveTo(c1, c2, p) => {
                            pb.cubic_to(c1.x, -c1.y, c2.x, -c2.y, p.x, -p.y)
                        }
                        Command::Close => pb.close(),
                    }
                }

                if let Some(path) = pb.finish() {
                    pixmap.fill_path(
                        &path,
                        &paint,
                        FillRule::Winding,
                        Transform::from_translate(glyph_x, glyph_y),
                        None,
                    );
                }
            }
        }
    }
}

impl Default for TextEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_quotes_names_with_spaces_or_hyphens() {
        assert_eq!(
            FontStack::new(Some("Microsoft YaHei"), "sans-serif").css(),
            "\"Microsoft YaHei\", sans-serif"
        );
        assert_eq!(
            FontStack::new(Some("Noto-Sans"), "serif").css(),
            "\"Noto-Sans\", serif"
        );
        assert_eq!(FontStack::new(Some("Arial"), "sans-serif").css(), "Arial, sans-serif");
        assert_eq!(FontStack::new(Some("  "), "sans-serif").css(), "sans-serif");
        assert!(FontStack::new(None, "sans-serif").is_ambient_only());
    }

    #[test]
    fn empty_engine_resolves_to_ambient() {
        let engine = TextEngine::empty();
        let stack = FontStack::new(Some("FontA"), AMBIENT_FAMILY);
        assert!(!engine.has_family("FontA"));
        assert_eq!(engine.resolve_family(&stack), AMBIENT_FAMILY);
    }

    #[test]
    fn empty_engine_draws_nothing() {
        let mut engine = TextEngine::empty();
        let stack = FontStack::ambient(AMBIENT_FAMILY);
        let font = FontSpec {
            stack: &stack,
            size_px: 40.0,
            weight: 600,
            italic: false,
        };
        let mut pixmap = Pixmap::new(100, 50).unwrap();
        engine.fill_line(
            &mut pixmap,
            "hello",
            50.0,
            25.0,
            &font,
            Color::BLACK,
            TextAlign::Center,
            TextBaseline::Middle,
        );
        assert!(pixmap.pixels().iter().all(|p| p.alpha() == 0));
        assert_eq!(engine.measure_width("hello", &font), 0.0);
    }

    #[test]
    fn invalid_font_data_adds_nothing() {
        let mut engine = TextEngine::empty();
        assert!(engine.load_font_data(b"not a font".to_vec()).is_empty());
        assert_eq!(engine.face_count(), 0);
    }

    #[test]
    fn offsets_follow_canvas_anchors() {
        assert_eq!(text_x_offset(100.0, TextAlign::Center), -50.0);
        assert_eq!(text_x_offset(100.0, TextAlign::Right), -100.0);
        assert_eq!(text_y_offset(100.0, TextBaseline::Alphabetic), 0.0);
        assert!((text_y_offset(100.0, TextBaseline::Middle) - 30.0).abs() < 1e-4);
    }
}
