use bytes::Bytes;
use image::GenericImageView;

use crate::error::{Result, SyncError};

/// Cover art ready to be shown by the companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// Zero when the decoder does not inspect the image.
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// Turns a transferred blob into displayable artwork.
pub trait ArtworkDecoder: Send + Sync {
    fn decode(&self, artwork_ref: &str, blob: &[u8]) -> Result<Artwork>;
}

/// Validates the blob with the `image` crate and records its dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ArtworkDecoder for ImageDecoder {
    fn decode(&self, artwork_ref: &str, blob: &[u8]) -> Result<Artwork> {
        let decoded = image::load_from_memory(blob).map_err(|e| SyncError::artwork(artwork_ref, e))?;
        let (width, height) = decoded.dimensions();
        Ok(Artwork {
            width,
            height,
            data: Bytes::copy_from_slice(blob),
        })
    }
}

/// Keeps the bytes as they arrived. Only an empty blob is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl ArtworkDecoder for RawDecoder {
    fn decode(&self, artwork_ref: &str, blob: &[u8]) -> Result<Artwork> {
        if blob.is_empty() {
            return Err(SyncError::artwork(artwork_ref, "empty blob"));
        }
        Ok(Artwork {
            width: 0,
            height: 0,
            data: Bytes::copy_from_slice(blob),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::artwork::png_bytes;

    #[test]
    fn test_image_decoder_reads_dimensions() {
        let artwork = ImageDecoder.decode("art://a", &png_bytes(30, 20)).unwrap();
        assert_eq!((artwork.width, artwork.height), (30, 20));
        assert!(!artwork.data.is_empty());
    }

    #[test]
    fn test_corrupt_blob_is_an_artwork_error() {
        let err = ImageDecoder.decode("art://broken", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, SyncError::Artwork { ref artwork_ref, .. } if artwork_ref == "art://broken"));
    }

    #[test]
    fn test_raw_decoder_passes_bytes_through() {
        let artwork = RawDecoder.decode("art://raw", &[9, 9]).unwrap();
        assert_eq!(artwork.data, Bytes::from_static(&[9, 9]));
        assert!(RawDecoder.decode("art://raw", &[]).is_err());
    }
}
