use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, GenericImageView};

use crate::error::{Result, SyncError};

/// Turns original cover art into a blob small enough for the link.
pub trait ArtworkResizer: Send + Sync {
    fn resize(&self, artwork_ref: &str, image: &[u8], max_dimension: u32) -> Result<Bytes>;
}

/// Decodes any supported format, fits it inside `max_dimension` and
/// re-encodes it as JPEG.
#[derive(Debug, Clone)]
pub struct JpegResizer {
    quality: u8,
}

impl JpegResizer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl ArtworkResizer for JpegResizer {
    fn resize(&self, artwork_ref: &str, image: &[u8], max_dimension: u32) -> Result<Bytes> {
        if image.is_empty() {
            return Err(SyncError::artwork(artwork_ref, "empty image"));
        }

        let decoded = image::load_from_memory(image).map_err(|e| SyncError::artwork(artwork_ref, e))?;
        let (width, height) = decoded.dimensions();
        let fitted = if width > max_dimension || height > max_dimension {
            decoded.thumbnail(max_dimension, max_dimension)
        } else {
            decoded
        };

        let rgb = fitted.to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(|e| SyncError::artwork(artwork_ref, e))?;

        Ok(Bytes::from(out))
    }
}

/// Forwards the original bytes untouched. Useful when the source already
/// serves thumbnails.
#[derive(Debug, Clone, Default)]
pub struct PassthroughResizer;

impl ArtworkResizer for PassthroughResizer {
    fn resize(&self, artwork_ref: &str, image: &[u8], _max_dimension: u32) -> Result<Bytes> {
        if image.is_empty() {
            return Err(SyncError::artwork(artwork_ref, "empty image"));
        }
        Ok(Bytes::copy_from_slice(image))
    }
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}
