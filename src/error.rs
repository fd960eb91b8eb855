use std::time::Duration;
use thiserror::Error;

/// Why an image download failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    /// Payload exceeded the configured byte limit.
    TooLarge { limit: usize },
    /// Image server answered with a non-2xx status.
    Status(u16),
    /// Connection-level failure while downloading.
    Transport(String),
}

impl std::fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadFailure::TooLarge { limit } => write!(f, "payload exceeds {} bytes", limit),
            DownloadFailure::Status(status) => write!(f, "server returned status {}", status),
            DownloadFailure::Transport(reason) => write!(f, "transport error: {}", reason),
        }
    }
}

/// Every failure the chart pipeline can produce.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Too many redirects (limit {limit}) for {url}")]
    TooManyRedirects { limit: usize, url: String },

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image download failed: {0}")]
    Download(DownloadFailure),

    #[error("Image could not be decoded: {0}")]
    Decode(String),

    #[error("Model API rate limit exceeded (retry after {retry_after:?})")]
    ApiRateLimit { retry_after: Option<Duration> },

    /// 5xx from the provider, or no response at all (`status` is `None`).
    #[error("Model API server error ({status:?}): {message}")]
    ApiServer { status: Option<u16>, message: String },

    #[error("Model API request timed out")]
    ApiTimeout,

    /// Validation-type failure reported by or about the model API. Never retried.
    #[error("Model API rejected the request: {0}")]
    ApiRequest(String),

    #[error("No chart image found on the page")]
    NoImageFound,
}

pub type Result<T> = std::result::Result<T, ChartError>;

impl ChartError {
    /// Errors the interpretation client is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChartError::ApiRateLimit { .. } | ChartError::ApiServer { .. } | ChartError::ApiTimeout
        )
    }

    /// Short label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            ChartError::Network(_) => "network",
            ChartError::Timeout(_) => "timeout",
            ChartError::HttpStatus { .. } => "http_status",
            ChartError::TooManyRedirects { .. } => "too_many_redirects",
            ChartError::UnsupportedFormat(_) => "unsupported_format",
            ChartError::Download(_) => "download",
            ChartError::Decode(_) => "decode",
            ChartError::ApiRateLimit { .. } => "api_rate_limit",
            ChartError::ApiServer { .. } => "api_server",
            ChartError::ApiTimeout => "api_timeout",
            ChartError::ApiRequest(_) => "api_request",
            ChartError::NoImageFound => "no_image_found",
        }
    }

    /// Message shown to the chat. Never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            ChartError::Network(_)
            | ChartError::Timeout(_)
            | ChartError::HttpStatus { .. }
            | ChartError::TooManyRedirects { .. } => {
                "❌ Couldn't reach that page. Please check the link and try again."
            }
            ChartError::NoImageFound => "🔍 No chart found on that page.",
            ChartError::UnsupportedFormat(_) => {
                "❌ Unsupported image format. Please send a PNG, JPEG or GIF image."
            }
            ChartError::Decode(_) => "❌ That image looks corrupted or truncated.",
            ChartError::Download(DownloadFailure::TooLarge { .. }) => {
                "❌ That image is too large to analyze."
            }
            ChartError::Download(_) => "❌ Couldn't download the chart image.",
            ChartError::ApiRateLimit { .. } | ChartError::ApiServer { .. } | ChartError::ApiTimeout => {
                "⏳ The analysis service is busy, please try again in a moment."
            }
            ChartError::ApiRequest(_) => GENERIC_ERROR_MESSAGE,
        }
    }
}

/// Reply used when something fails outside the error taxonomy (e.g. a panic).
pub const GENERIC_ERROR_MESSAGE: &str =
    "❌ Sorry, something went wrong while analyzing the chart. Please try again.";
