use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::error::{ChartError, DownloadFailure, Result};
use crate::fetcher::{ensure_http, map_transport_error};
use crate::models::{CandidateImage, ImageFormat, ImagePayload};

/// Downloads and validates chart images.
#[derive(Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    max_redirects: usize,
}

impl ImageLoader {
    pub fn new(client: reqwest::Client, settings: &PipelineSettings) -> Self {
        Self {
            client,
            timeout: settings.image_timeout,
            max_bytes: settings.max_image_bytes,
            max_redirects: settings.max_redirects,
        }
    }

    pub async fn load(&self, candidate: &CandidateImage) -> Result<ImagePayload> {
        let url = &candidate.url;
        ensure_http(url)?;
        info!(stage = "load", url = %url, "downloading candidate image");

        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.download_error(e, candidate))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChartError::Download(DownloadFailure::Status(status.as_u16())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(self.too_large());
            }
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| candidate.mime_type.map(|format| format.mime().to_string()));

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.download_error(e, candidate))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(stage = "load", url = %url, bytes = bytes.len(), "image downloaded");
        self.validate(bytes, declared.as_deref())
    }

    /// Validates bytes that are already in memory (chat attachments, downloads).
    ///
    /// Magic bytes decide the format; a declared image type outside PNG/JPEG/GIF is
    /// rejected up front, and anything that does not decode is reported as corrupt.
    pub fn validate(&self, bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<ImagePayload> {
        if bytes.len() > self.max_bytes {
            return Err(self.too_large());
        }
        if bytes.is_empty() {
            return Err(ChartError::Decode("empty payload".to_string()));
        }

        let declared = match declared_mime {
            Some(mime) => declared_format(mime)?,
            None => None,
        };

        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            ChartError::UnsupportedFormat(format!(
                "signature does not match PNG, JPEG or GIF (declared {})",
                declared_mime.unwrap_or("nothing")
            ))
        })?;

        if let Some(declared) = declared {
            if declared != format {
                warn!(stage = "load", %declared, sniffed = %format, "declared image type does not match content");
            }
        }

        let image = image::load_from_memory_with_format(&bytes, format.to_image_crate())
            .map_err(|e| ChartError::Decode(e.to_string()))?;
        let dimensions = (image.width(), image.height());

        debug!(stage = "load", %format, width = dimensions.0, height = dimensions.1, "image validated");
        Ok(ImagePayload {
            bytes,
            format,
            dimensions,
        })
    }

    fn too_large(&self) -> ChartError {
        ChartError::Download(DownloadFailure::TooLarge {
            limit: self.max_bytes,
        })
    }

    fn download_error(&self, err: reqwest::Error, candidate: &CandidateImage) -> ChartError {
        match map_transport_error(err, &candidate.url, self.max_redirects) {
            ChartError::Network(reason) => ChartError::Download(DownloadFailure::Transport(reason)),
            other => other,
        }
    }
}

/// `Ok(None)` when the declared type says nothing about the image format
/// (e.g. `application/octet-stream`); an error for image types we cannot forward.
fn declared_format(mime: &str) -> Result<Option<ImageFormat>> {
    if let Some(format) = ImageFormat::from_mime(mime) {
        return Ok(Some(format));
    }
    if mime.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(ChartError::UnsupportedFormat(mime.to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bmp_bytes, jpeg_bytes, png_bytes, Route, TestServer};
    use crate::fetcher::build_http_client;
    use url::Url;

    fn loader_with(max_bytes: usize) -> ImageLoader {
        let settings = PipelineSettings {
            image_timeout: Duration::from_millis(500),
            max_image_bytes: max_bytes,
            ..PipelineSettings::default()
        };
        ImageLoader::new(build_http_client(&settings).unwrap(), &settings)
    }

    fn loader() -> ImageLoader {
        loader_with(5 * 1024 * 1024)
    }

    fn candidate(url: Url) -> CandidateImage {
        CandidateImage {
            url,
            mime_type: None,
            size_hint: None,
            alt_text: None,
            caption: None,
        }
    }

    #[tokio::test]
    async fn downloads_valid_png() {
        let server = TestServer::start(vec![("/chart.png", Route::ok("image/png", png_bytes(64, 48)))]).await;
        let payload = loader().load(&candidate(server.url("/chart.png"))).await.unwrap();
        assert_eq!(payload.format, ImageFormat::Png);
        assert_eq!(payload.dimensions, (64, 48));
    }

    #[tokio::test]
    async fn text_labelled_as_png_is_rejected() {
        let server = TestServer::start(vec![(
            "/fake.png",
            Route::ok("image/png", "this is definitely not an image"),
        )])
        .await;
        let err = loader().load(&candidate(server.url("/fake.png"))).await.unwrap_err();
        assert!(matches!(err, ChartError::UnsupportedFormat(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unsupported_declared_type_is_rejected() {
        let server = TestServer::start(vec![("/chart.bmp", Route::ok("image/bmp", bmp_bytes()))]).await;
        let err = loader().load(&candidate(server.url("/chart.bmp"))).await.unwrap_err();
        assert!(matches!(err, ChartError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn oversized_content_length_fails_before_reading() {
        let server = TestServer::start(vec![("/big.png", Route::ok("image/png", png_bytes(300, 300)))]).await;
        let err = loader_with(100).load(&candidate(server.url("/big.png"))).await.unwrap_err();
        assert!(matches!(
            err,
            ChartError::Download(DownloadFailure::TooLarge { limit: 100 })
        ));
    }

    #[tokio::test]
    async fn oversized_body_without_length_fails_while_streaming() {
        let server = TestServer::start(vec![(
            "/streamed.png",
            Route::ok("image/png", png_bytes(300, 300)).without_content_length(),
        )])
        .await;
        let err = loader_with(500).load(&candidate(server.url("/streamed.png"))).await.unwrap_err();
        assert!(matches!(
            err,
            ChartError::Download(DownloadFailure::TooLarge { limit: 500 })
        ));
    }

    #[tokio::test]
    async fn body_without_length_within_limit_loads() {
        let server = TestServer::start(vec![(
            "/streamed.png",
            Route::ok("image/png", png_bytes(16, 16)).without_content_length(),
        )])
        .await;
        let payload = loader().load(&candidate(server.url("/streamed.png"))).await.unwrap();
        assert_eq!(payload.dimensions, (16, 16));
    }

    #[tokio::test]
    async fn slow_image_server_times_out() {
        let server = TestServer::start(vec![(
            "/slow.png",
            Route::ok("image/png", png_bytes(8, 8)).with_delay(Duration::from_secs(5)),
        )])
        .await;
        let err = loader().load(&candidate(server.url("/slow.png"))).await.unwrap_err();
        assert!(matches!(err, ChartError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn image_server_errors_are_download_failures() {
        let server = TestServer::start(vec![]).await;
        let err = loader().load(&candidate(server.url("/missing.png"))).await.unwrap_err();
        assert!(matches!(err, ChartError::Download(DownloadFailure::Status(404))));
    }

    #[tokio::test]
    async fn generic_content_type_falls_back_to_sniffing() {
        let server = TestServer::start(vec![(
            "/blob",
            Route::ok("application/octet-stream", jpeg_bytes(32, 32)),
        )])
        .await;
        let payload = loader().load(&candidate(server.url("/blob"))).await.unwrap();
        assert_eq!(payload.format, ImageFormat::Jpeg);
    }

    #[test]
    fn sniffed_format_wins_over_declared_one() {
        let payload = loader().validate(png_bytes(10, 10), Some("image/jpeg")).unwrap();
        assert_eq!(payload.format, ImageFormat::Png);
    }

    #[test]
    fn truncated_png_fails_decode() {
        let mut bytes = png_bytes(200, 200);
        bytes.truncate(bytes.len() / 2);
        let err = loader().validate(bytes, Some("image/png")).unwrap_err();
        assert!(matches!(err, ChartError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn bmp_attachment_without_declared_type_is_unsupported() {
        let err = loader().validate(bmp_bytes(), None).unwrap_err();
        assert!(matches!(err, ChartError::UnsupportedFormat(_)));
    }

    #[test]
    fn in_memory_payload_respects_size_limit() {
        let err = loader_with(10).validate(png_bytes(10, 10), None).unwrap_err();
        assert!(matches!(err, ChartError::Download(DownloadFailure::TooLarge { .. })));
    }

    #[test]
    fn empty_payload_is_corrupt() {
        let err = loader().validate(Vec::new(), Some("image/png")).unwrap_err();
        assert!(matches!(err, ChartError::Decode(_)));
    }
}
