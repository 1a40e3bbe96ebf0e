//! Export state machine, encoding and file naming.
//!
//! ```text
//! Idle ──► Rendering ──► Encoding ──► Done
//!              │             │
//!              └─────────────┴──────► Failed
//! ```
//!
//! Only one export may be in flight. [`ExportPipeline::try_begin`] rejects a
//! second request with [`ExportError::Busy`] while the first is rendering or
//! encoding. The returned [`ExportGuard`] moves the pipeline through the
//! phases; dropping it before [`ExportGuard::finish`] leaves the pipeline in
//! `Failed`, which also covers a cancelled export future.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use crate::error::ExportError;
use crate::geometry::{ScaleFactor, SizePx};
use crate::style::{ExportFormat, ExportSettings, clamp_quality};

// ============================================================================
// State machine
// ============================================================================

/// Where the export pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportPhase {
    #[default]
    Idle,
    Rendering,
    Encoding,
    Done,
    Failed,
}

impl ExportPhase {
    /// True while an export holds the pipeline.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Rendering | Self::Encoding)
    }
}

/// Shared handle to the export phase.
///
/// Clones observe the same phase, so a UI can hold one to display progress.
#[derive(Debug, Clone, Default)]
pub struct ExportPipeline {
    phase: Arc<Mutex<ExportPhase>>,
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ExportPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.phase().is_busy()
    }

    /// Claims the pipeline and enters `Rendering`.
    pub fn try_begin(&self) -> Result<ExportGuard, ExportError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.is_busy() {
            log::warn!(target: "export", "export rejected: pipeline is {:?}", *phase);
            return Err(ExportError::Busy);
        }
        *phase = ExportPhase::Rendering;
        Ok(ExportGuard {
            phase: Arc::clone(&self.phase),
            finished: false,
        })
    }
}

/// Exclusive claim on an [`ExportPipeline`] for one export.
#[derive(Debug)]
pub struct ExportGuard {
    phase: Arc<Mutex<ExportPhase>>,
    finished: bool,
}

impl ExportGuard {
    fn set(&self, next: ExportPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        log::debug!(target: "export", "{:?} -> {:?}", *phase, next);
        *phase = next;
    }

    /// Rendering is complete; move to `Encoding`.
    pub fn encoding(&self) {
        self.set(ExportPhase::Encoding);
    }

    /// The artifact was produced; move to `Done`.
    pub fn finish(mut self) {
        self.finished = true;
        self.set(ExportPhase::Done);
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.set(ExportPhase::Failed);
        }
    }
}

// ============================================================================
// Request and artifact
// ============================================================================

/// Parameters of one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    /// Encoder quality in `[0, 1]`.
    pub quality: f32,
    pub width: u32,
    pub height: u32,
    /// Output file name. Defaults to `Cover-<unix millis>.<ext>`.
    pub file_name: Option<String>,
}

impl ExportRequest {
    pub fn size(&self) -> SizePx {
        SizePx::new(self.width, self.height)
    }

    /// The caller's file name, or a timestamped default.
    pub fn resolved_file_name(&self) -> String {
        match self.file_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => default_file_name(self.format),
        }
    }
}

impl From<&ExportSettings> for ExportRequest {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            format: settings.format,
            quality: settings.quality,
            width: settings.target_width,
            height: settings.target_height,
            file_name: settings.file_name.clone(),
        }
    }
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self::from(&ExportSettings::default())
    }
}

/// An encoded cover image, ready to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Scale factor the layers were rendered with.
    pub scale: ScaleFactor,
}

impl ExportArtifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Writes the file into `dir` and returns its path.
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ExportError> {
        let path = dir.as_ref().join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        log::info!(target: "export", "wrote {} ({} bytes)", path.display(), self.bytes.len());
        Ok(path)
    }
}

/// `Cover-<unix millis>.<ext>`.
pub fn default_file_name(format: ExportFormat) -> String {
    format!(
        "Cover-{}.{}",
        chrono::Utc::now().timestamp_millis(),
        format.extension()
    )
}

// ============================================================================
// Encoding
// ============================================================================

/// JPEG quality (1..=100) for a `[0, 1]` quality value.
pub fn jpeg_quality(quality: f32) -> u8 {
    (clamp_quality(quality) * 100.0).round().clamp(1.0, 100.0) as u8
}

/// libwebp quality factor (0..=100) for a `[0, 1]` quality value.
pub fn webp_quality(quality: f32) -> f32 {
    clamp_quality(quality) * 100.0
}

/// Encodes a straight-alpha image.
///
/// JPEG drops the alpha channel. PNG ignores `quality`; JPEG and WebP are
/// lossy at the requested quality.
pub fn encode_image(
    image: &RgbaImage,
    format: ExportFormat,
    quality: f32,
) -> Result<Vec<u8>, ExportError> {
    let (width, height) = image.dimensions();
    let mut out = Cursor::new(Vec::new());

    match format {
        ExportFormat::Png => PngEncoder::new(&mut out).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        )?,
        ExportFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?
        }
        ExportFormat::Webp => {
            let encoded = webp::Encoder::from_rgba(image.as_raw(), width, height)
                .encode_simple(false, webp_quality(quality))
                .map_err(|e| ExportError::EncodeFailure(format!("webp encoder failed: {e:?}")))?;
            out.get_mut().extend_from_slice(&encoded);
        }
    }

    let bytes = out.into_inner();
    if bytes.is_empty() {
        return Err(ExportError::EncodeFailure(format!(
            "{} encoder produced no output",
            format.extension()
        )));
    }
    log::debug!(target: "export", "encoded {}x{} {} ({} bytes)", width, height, format.extension(), bytes.len());
    Ok(bytes)
}

/// Runs [`encode_image`] on the blocking pool.
pub async fn encode_image_async(
    image: RgbaImage,
    format: ExportFormat,
    quality: f32,
) -> Result<Vec<u8>, ExportError> {
    tokio::task::spawn_blocking(move || encode_image(&image, format, quality))
        .await
        .map_err(|e| ExportError::EncodeFailure(format!("encode task failed: {e}")))?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(8, 4, |x, _| Rgba([x as u8 * 30, 100, 200, 255]))
    }

    #[test]
    fn second_begin_is_rejected_while_busy() {
        let pipeline = ExportPipeline::new();
        let guard = pipeline.try_begin().unwrap();
        assert_eq!(pipeline.phase(), ExportPhase::Rendering);
        assert!(matches!(pipeline.try_begin(), Err(ExportError::Busy)));

        guard.encoding();
        assert_eq!(pipeline.phase(), ExportPhase::Encoding);
        assert!(matches!(pipeline.try_begin(), Err(ExportError::Busy)));

        guard.finish();
        assert_eq!(pipeline.phase(), ExportPhase::Done);
        assert!(pipeline.try_begin().is_ok());
    }

    #[test]
    fn dropped_guard_fails_the_export() {
        let pipeline = ExportPipeline::new();
        drop(pipeline.try_begin().unwrap());
        assert_eq!(pipeline.phase(), ExportPhase::Failed);
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn encodes_each_format_with_its_signature() {
        let png = encode_image(&sample(), ExportFormat::Png, 1.0).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        let jpeg = encode_image(&sample(), ExportFormat::Jpeg, 0.8).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let webp = encode_image(&sample(), ExportFormat::Webp, 0.95).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn webp_quality_changes_the_output() {
        let gradient = RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x * y) % 256) as u8, 255])
        });
        let low = encode_image(&gradient, ExportFormat::Webp, 0.1).unwrap();
        let high = encode_image(&gradient, ExportFormat::Webp, 0.95).unwrap();
        assert_ne!(low, high);
        assert!(low.len() < high.len(), "{} >= {}", low.len(), high.len());

        let decoded = image::load_from_memory(&high).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (64, 64));
        assert_eq!(webp_quality(0.95), 95.0);
        assert_eq!(webp_quality(7.0), 100.0);
    }

    #[test]
    fn png_round_trips_pixels() {
        let png = encode_image(&sample(), ExportFormat::Png, 1.0).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(jpeg_quality(0.95), 95);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(2.0), 100);
    }

    #[test]
    fn file_names() {
        let name = default_file_name(ExportFormat::Jpeg);
        assert!(name.starts_with("Cover-"));
        assert!(name.ends_with(".jpg"));
        let millis = &name["Cover-".len()..name.len() - ".jpg".len()];
        assert!(millis.parse::<i64>().unwrap() > 0);

        let request = ExportRequest {
            file_name: Some("mine.png".into()),
            ..ExportRequest::default()
        };
        assert_eq!(request.resolved_file_name(), "mine.png");

        let request = ExportRequest {
            file_name: Some("   ".into()),
            ..ExportRequest::default()
        };
        assert!(request.resolved_file_name().ends_with(".webp"));
    }

    #[test]
    fn save_to_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ExportArtifact {
            file_name: "cover.png".into(),
            format: ExportFormat::Png,
            bytes: vec![1, 2, 3],
            width: 1,
            height: 1,
            scale: ScaleFactor::IDENTITY,
        };
        let path = artifact.save_to(dir.path()).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
        assert_eq!(artifact.mime_type(), "image/png");
    }
}
