use serde::{Deserialize, Serialize};
use url::Url;

/// What a chat message asked us to analyze.
#[derive(Debug, Clone)]
pub enum ChartSource {
    /// Image bytes sent directly as an attachment.
    Image {
        bytes: Vec<u8>,
        declared_mime: Option<String>,
    },
    /// A page that should contain a chart.
    Url(Url),
}

/// Image formats the model API accepts from us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_SIGNATURE: &[u8] = b"GIF87a";
const GIF89_SIGNATURE: &[u8] = b"GIF89a";

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
        }
    }

    /// Maps a MIME type (parameters allowed) to a supported format.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" | "jpe" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    /// Detects the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_SIGNATURE) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(JPEG_SIGNATURE) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(GIF87_SIGNATURE) || bytes.starts_with(GIF89_SIGNATURE) {
            Some(ImageFormat::Gif)
        } else {
            None
        }
    }

    pub(crate) fn to_image_crate(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Gif => image::ImageFormat::Gif,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Gif => "GIF",
        })
    }
}

/// An image reference found on a page; not yet known to be a chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateImage {
    /// Always absolute http(s).
    pub url: Url,
    /// Format implied by the file extension, if any.
    pub mime_type: Option<ImageFormat>,
    /// Declared `width`/`height` attributes.
    pub size_hint: Option<(u32, u32)>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
}

impl CandidateImage {
    pub fn area(&self) -> Option<u64> {
        self.size_hint.map(|(w, h)| u64::from(w) * u64::from(h))
    }

    /// Caption, falling back to alt text.
    pub fn label(&self) -> Option<&str> {
        self.caption
            .as_deref()
            .or(self.alt_text.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A validated image ready to be sent to the model API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub dimensions: (u32, u32),
}

impl ImagePayload {
    pub fn data_url(&self) -> String {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        format!("data:{};base64,{}", self.format.mime(), BASE64.encode(&self.bytes))
    }
}

/// Chart analysis assembled from the model's free-text answer.
/// Missing sections are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub chart_type: String,
    pub trends: String,
    pub data_points: String,
    pub interpretation: String,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.chart_type.is_empty()
            && self.trends.is_empty()
            && self.data_points.is_empty()
            && self.interpretation.is_empty()
    }
}
