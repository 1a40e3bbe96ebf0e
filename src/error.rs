//! Error types for layer rendering and export.

use thiserror::Error;

use crate::image_cache::ImageHandle;

/// Result type alias using [`ComposeError`].
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Errors raised while rendering layers or compositing the preview.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The bitmap behind an image handle could not be decoded.
    ///
    /// Only the layer that referenced the image is aborted; its previous
    /// content is left in place.
    #[error("Failed to decode image {handle}: {reason}")]
    ImageDecodeFailure { handle: ImageHandle, reason: String },

    /// An image handle was referenced that was never registered.
    #[error("Unknown image handle: {0}")]
    UnknownImage(ImageHandle),

    /// The preview surface was composited before it was attached.
    #[error("Preview canvas is not initialized")]
    CanvasNotInitialized,

    /// Invalid surface dimensions (must be positive and within limits).
    #[error("Invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Errors raised by the export pipeline.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Another export is still rendering or encoding.
    #[error("An export is already in progress")]
    Busy,

    /// A layer failed to render at the export resolution.
    #[error(transparent)]
    Render(#[from] ComposeError),

    /// The encoder produced no output or reported an error.
    #[error("Encoding failed: {0}")]
    EncodeFailure(String),

    /// Writing the exported file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for ExportError {
    fn from(err: image::ImageError) -> Self {
        ExportError::EncodeFailure(err.to_string())
    }
}
