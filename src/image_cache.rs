//! Session-lifetime cache of decoded bitmaps.
//!
//! Callers register the raw bytes of a picked file and receive an
//! [`ImageHandle`]. Decoding happens lazily, off the calling task, the first
//! time a layer needs the bitmap. Entries are never evicted: the cache only
//! grows for the lifetime of the session and an entry, once decoded (or
//! failed), is reused by every later redraw.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};
use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, ComposeResult};
use crate::surface::rgba_image_to_pixmap;

/// Opaque handle to an image registered with an [`ImageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(u64);

impl ImageHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum Entry {
    Pending(Arc<[u8]>),
    Decoded(Arc<Pixmap>),
    Failed(String),
}

/// Append-only map from handles to decoded, premultiplied bitmaps.
#[derive(Default)]
pub struct ImageCache {
    entries: HashMap<ImageHandle, Entry>,
    next_id: u64,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers encoded image bytes (PNG, JPEG, WebP, GIF, BMP or SVG).
    pub fn insert_bytes(&mut self, bytes: impl Into<Arc<[u8]>>) -> ImageHandle {
        let handle = self.next_handle();
        self.entries.insert(handle, Entry::Pending(bytes.into()));
        handle
    }

    /// Registers an already decoded bitmap.
    pub fn insert_decoded(&mut self, image: &image::RgbaImage) -> ComposeResult<ImageHandle> {
        let pixmap = rgba_image_to_pixmap(image).ok_or(ComposeError::InvalidDimensions {
            width: image.width(),
            height: image.height(),
        })?;
        let handle = self.next_handle();
        self.entries
            .insert(handle, Entry::Decoded(Arc::new(pixmap)));
        Ok(handle)
    }

    fn next_handle(&mut self) -> ImageHandle {
        self.next_id += 1;
        ImageHandle(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: ImageHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Returns true if the handle is registered but not decoded yet.
    pub fn is_pending(&self, handle: ImageHandle) -> bool {
        matches!(self.entries.get(&handle), Some(Entry::Pending(_)))
    }

    /// Looks up a decoded bitmap without decoding.
    pub fn bitmap(&self, handle: ImageHandle) -> ComposeResult<Arc<Pixmap>> {
        match self.entries.get(&handle) {
            Some(Entry::Decoded(pixmap)) => Ok(Arc::clone(pixmap)),
            Some(Entry::Failed(reason)) => Err(ComposeError::ImageDecodeFailure {
                handle,
                reason: reason.clone(),
            }),
            Some(Entry::Pending(_)) => Err(ComposeError::ImageDecodeFailure {
                handle,
                reason: "image has not been decoded yet".to_string(),
            }),
            None => Err(ComposeError::UnknownImage(handle)),
        }
    }

    /// Decodes the image if needed and returns the bitmap.
    ///
    /// Decoding runs on the blocking pool so the calling task only suspends.
    /// A failure is remembered; the same handle is never decoded twice.
    pub async fn ensure_decoded(&mut self, handle: ImageHandle) -> ComposeResult<Arc<Pixmap>> {
        let bytes = match self.entries.get(&handle) {
            Some(Entry::Pending(bytes)) => Arc::clone(bytes),
            _ => return self.bitmap(handle),
        };

        log::debug!(target: "images", "decoding image {} ({} bytes)", handle, bytes.len());
        let decoded = tokio::task::spawn_blocking(move || decode_image(&bytes))
            .await
            .map_err(|e| format!("decode task failed: {e}"))
            .and_then(|result| result);

        let entry = match decoded {
            Ok(pixmap) => Entry::Decoded(Arc::new(pixmap)),
            Err(reason) => {
                log::warn!(target: "images", "failed to decode image {}: {}", handle, reason);
                Entry::Failed(reason)
            }
        };
        self.entries.insert(handle, entry);
        self.bitmap(handle)
    }
}

/// Decodes raster formats through `image` and SVG through `resvg`.
pub(crate) fn decode_image(bytes: &[u8]) -> Result<Pixmap, String> {
    if looks_like_svg(bytes) {
        return render_svg(bytes);
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| e.to_string())?
        .to_rgba8();
    rgba_image_to_pixmap(&img).ok_or_else(|| "image has zero size".to_string())
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && text.contains("<svg"))
}

/// Rasterizes an SVG document at its intrinsic size.
fn render_svg(bytes: &[u8]) -> Result<Pixmap, String> {
    let tree = Tree::from_data(bytes, &Options::default()).map_err(|e| e.to_string())?;
    let size = tree.size();
    let width = size.width().ceil() as u32;
    let height = size.height().ceil() as u32;

    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| "SVG has zero size".to_string())?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    const SIMPLE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"><rect width="40" height="20" fill="#ff0000"/></svg>"##;

    fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn decodes_png_once_and_reuses_entry() {
        let mut cache = ImageCache::new();
        let handle = cache.insert_bytes(png_bytes(3, 2, [0, 0, 255, 255]));
        assert!(cache.is_pending(handle));

        let first = cache.ensure_decoded(handle).await.unwrap();
        assert_eq!((first.width(), first.height()), (3, 2));
        assert!(!cache.is_pending(handle));

        let second = cache.ensure_decoded(handle).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn decode_failure_is_remembered() {
        let mut cache = ImageCache::new();
        let handle = cache.insert_bytes(b"definitely not an image".to_vec());

        let err = cache.ensure_decoded(handle).await.unwrap_err();
        assert!(matches!(err, ComposeError::ImageDecodeFailure { .. }));
        assert!(matches!(
            cache.bitmap(handle),
            Err(ComposeError::ImageDecodeFailure { .. })
        ));
    }

    #[tokio::test]
    async fn decodes_svg_with_resvg() {
        let mut cache = ImageCache::new();
        let handle = cache.insert_bytes(SIMPLE_SVG.as_bytes().to_vec());

        let pixmap = cache.ensure_decoded(handle).await.unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (40, 20));
        let center = pixmap.pixel(20, 10).unwrap();
        assert_eq!((center.red(), center.alpha()), (255, 255));
    }

    #[test]
    fn unknown_and_pending_lookups() {
        let mut cache = ImageCache::new();
        assert!(matches!(
            cache.bitmap(ImageHandle(99)),
            Err(ComposeError::UnknownImage(_))
        ));

        let handle = cache.insert_bytes(png_bytes(1, 1, [0, 0, 0, 255]));
        assert!(cache.bitmap(handle).is_err());
    }

    #[test]
    fn handles_are_unique() {
        let mut cache = ImageCache::new();
        let a = cache.insert_bytes(vec![1u8]);
        let b = cache
            .insert_decoded(&RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 255])))
            .unwrap();
        assert_ne!(a, b);
        assert!(cache.bitmap(b).is_ok());
    }
}
