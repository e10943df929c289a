//! Reference-image intake: sniff, size-check and base64-encode user images
//! before they are attached to a [`TaskRequest`](crate::runtime::types::TaskRequest).

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use tracing::debug;

use crate::runtime::types::ValidationError;

/// Largest accepted reference image, in decoded bytes.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const ACCEPTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Gif,
];

/// A still image that seeds the generation, already in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    encoded_bytes: String,
    media_type: String,
}

impl ReferenceImage {
    /// Wrap an already-encoded payload without inspecting it.
    pub fn from_parts(encoded_bytes: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            encoded_bytes: encoded_bytes.into(),
            media_type: media_type.into(),
        }
    }

    /// Sniff the format from the content and encode it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::ImageTooLarge {
                size: bytes.len(),
                limit: MAX_IMAGE_BYTES,
            });
        }

        let format = sniff(bytes)?;
        Ok(Self {
            encoded_bytes: STANDARD.encode(bytes),
            media_type: format.to_mime_type().to_owned(),
        })
    }

    /// Read and encode an image file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ValidationError::UnreadableImage {
                message: format!("{}: {e}", path.display()),
            })?;
        debug!(path = %path.display(), size = bytes.len(), "reference image read");
        Self::from_bytes(&bytes)
    }

    /// Parse a `data:<media-type>;base64,<payload>` URL.
    ///
    /// The declared media type must agree with the sniffed content.
    pub fn from_data_url(url: &str) -> Result<Self, ValidationError> {
        let unreadable = |message: &str| ValidationError::UnreadableImage {
            message: message.to_owned(),
        };

        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| unreadable("not a data URL"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| unreadable("data URL has no payload"))?;
        let declared = header
            .strip_suffix(";base64")
            .ok_or_else(|| unreadable("data URL is not base64 encoded"))?;

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| ValidationError::UnreadableImage {
                message: format!("invalid base64 payload: {e}"),
            })?;
        let image = Self::from_bytes(&bytes)?;

        if !declared.eq_ignore_ascii_case(&image.media_type) {
            return Err(ValidationError::UnsupportedImage {
                media_type: declared.to_owned(),
            });
        }
        Ok(image)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.encoded_bytes)
    }

    /// Base64 payload.
    pub fn encoded_bytes(&self) -> &str {
        &self.encoded_bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Approximate decoded size.
    pub fn decoded_len(&self) -> usize {
        let padding = self.encoded_bytes.bytes().rev().take_while(|b| *b == b'=').count();
        ((self.encoded_bytes.len() / 4) * 3).saturating_sub(padding.min(2))
    }
}

fn sniff(bytes: &[u8]) -> Result<ImageFormat, ValidationError> {
    match image::guess_format(bytes) {
        Ok(format) if ACCEPTED_FORMATS.contains(&format) => Ok(format),
        Ok(format) => Err(ValidationError::UnsupportedImage {
            media_type: format.to_mime_type().to_owned(),
        }),
        Err(_) => Err(ValidationError::UnsupportedImage {
            media_type: "application/octet-stream".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    const GIF_HEADER: &[u8] = b"GIF89a\x01\x00\x01\x00";

    #[test]
    fn sniffs_supported_formats() {
        let png = ReferenceImage::from_bytes(PNG_HEADER).unwrap();
        assert_eq!(png.media_type(), "image/png");
        assert_eq!(png.encoded_bytes(), STANDARD.encode(PNG_HEADER));
        assert_eq!(png.decoded_len(), PNG_HEADER.len());

        let jpeg = ReferenceImage::from_bytes(JPEG_HEADER).unwrap();
        assert_eq!(jpeg.media_type(), "image/jpeg");

        let gif = ReferenceImage::from_bytes(GIF_HEADER).unwrap();
        assert_eq!(gif.media_type(), "image/gif");
    }

    #[test]
    fn rejects_non_images() {
        let err = ReferenceImage::from_bytes(b"hello world, not an image").unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedImage { .. }));
    }

    #[test]
    fn rejects_oversized_images() {
        let mut big = PNG_HEADER.to_vec();
        big.resize(MAX_IMAGE_BYTES + 1, 0);
        let err = ReferenceImage::from_bytes(&big).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ImageTooLarge {
                size: MAX_IMAGE_BYTES + 1,
                limit: MAX_IMAGE_BYTES
            }
        );
    }

    #[test]
    fn data_url_round_trip_preserves_payload() {
        let image = ReferenceImage::from_bytes(PNG_HEADER).unwrap();
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ReferenceImage::from_data_url(&url).unwrap(), image);
    }

    #[test]
    fn data_url_with_mismatched_type_is_rejected() {
        let url = format!("data:image/jpeg;base64,{}", STANDARD.encode(PNG_HEADER));
        let err = ReferenceImage::from_data_url(&url).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedImage {
                media_type: "image/jpeg".into()
            }
        );
    }

    #[test]
    fn malformed_data_urls_are_unreadable() {
        for url in ["image/png;base64,AAAA", "data:image/png;base64", "data:image/png,AAAA"] {
            assert!(matches!(
                ReferenceImage::from_data_url(url),
                Err(ValidationError::UnreadableImage { .. })
            ));
        }
    }

    #[tokio::test]
    async fn load_missing_file_is_unreadable() {
        let err = ReferenceImage::load("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, ValidationError::UnreadableImage { .. }));
    }
}
