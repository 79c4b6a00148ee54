//! Image format detection.

use serde::{Deserialize, Serialize};

/// Source image formats accepted by the video providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG.
    Png,
    /// JPEG. Assumed when detection fails.
    #[default]
    Jpeg,
    /// WebP.
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Parses a MIME type such as `image/png`.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }

    /// Detects the MIME type of base64-encoded image data, or returns `fallback`.
    pub fn mime_from_base64(base64_data: &str, fallback: &str) -> String {
        use base64::Engine;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(base64_data))
            .unwrap_or_default();

        Self::from_magic_bytes(&bytes)
            .map(|f| f.mime_type().to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn test_magic_bytes() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(ImageFormat::from_magic_bytes(&png), Some(ImageFormat::Png));

        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0, 1];
        assert_eq!(ImageFormat::from_magic_bytes(&jpeg), Some(ImageFormat::Jpeg));

        let webp = *b"RIFF\x24\0\0\0WEBPVP8 ";
        assert_eq!(ImageFormat::from_magic_bytes(&webp), Some(ImageFormat::WebP));

        assert_eq!(ImageFormat::from_magic_bytes(b"short"), None);
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a......"), None);
    }

    #[test]
    fn test_mime_from_base64() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let b64 = base64::engine::general_purpose::STANDARD.encode(png);
        assert_eq!(ImageFormat::mime_from_base64(&b64, "image/jpeg"), "image/png");
        assert_eq!(
            ImageFormat::mime_from_base64("not base64!", "image/jpeg"),
            "image/jpeg"
        );
    }

    #[test]
    fn test_from_mime_type() {
        assert_eq!(ImageFormat::from_mime_type("IMAGE/JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime_type("image/gif"), None);
        assert_eq!(ImageFormat::WebP.extension(), "webp");
    }
}
