use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
    Gif,
    Bmp,
    Tiff,
    Avif,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Avif => "image/avif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Avif => "avif",
        }
    }

    /// Parse a Content-Type value, ignoring parameters such as `; charset=`.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" | "image/x-png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/tiff" => Some(Self::Tiff),
            "image/avif" => Some(Self::Avif),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Extension of the last path segment, with query and fragment ignored.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or("");
        let last = path.rsplit('/').next().unwrap_or("");
        let (_, ext) = last.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Content type first, URL extension second.
    pub fn infer(content_type: Option<&str>, url: Option<&str>) -> Option<Self> {
        content_type
            .and_then(Self::from_mime)
            .or_else(|| url.and_then(Self::from_url))
    }

    /// Detect format from the leading magic bytes.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.len() >= 3 && header[0..3] == [0xFF, 0xD8, 0xFF] {
            return Some(Self::Jpeg);
        }
        if header.len() >= 8 && header[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
            return Some(Self::Png);
        }
        if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }
        if header.len() >= 6 && (&header[0..6] == b"GIF87a" || &header[0..6] == b"GIF89a") {
            return Some(Self::Gif);
        }
        if header.len() >= 2 && &header[0..2] == b"BM" {
            return Some(Self::Bmp);
        }
        if header.len() >= 4 && (header[0..4] == [b'I', b'I', 0x2A, 0x00] || header[0..4] == [b'M', b'M', 0x00, 0x2A]) {
            return Some(Self::Tiff);
        }
        // ISO-BMFF: bytes 4..8 == "ftyp", brand at 8..12.
        if header.len() >= 12 && &header[4..8] == b"ftyp" && (&header[8..12] == b"avif" || &header[8..12] == b"avis") {
            return Some(Self::Avif);
        }
        None
    }
}
