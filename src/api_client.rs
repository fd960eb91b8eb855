use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::config::ApiSettings;
use crate::error::{ChartError, Result};
use crate::models::{AnalysisResult, ImagePayload};
use crate::parser::{ResponseParser, SectionParser};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub const SYSTEM_PROMPT: &str = "You are an expert at analyzing charts and graphs. \
    Describe only what the image shows and say so when a value cannot be read precisely.";

pub const ANALYSIS_PROMPT: &str = "Analyze the chart in this image. Answer with exactly these \
    four sections, each starting on its own line with the heading shown:\n\
    Chart Type: the kind of chart (bar, line, scatter, area, pie, ...)\n\
    Trends: the main trends and patterns\n\
    Key Data Points: the most important values, labels and extremes\n\
    Interpretation: what the chart means overall";

/// One image-plus-prompt request to the model API.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// `data:<mime>;base64,...`
    pub image_data_url: String,
}

impl VisionRequest {
    pub fn for_payload(payload: &ImagePayload) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt: ANALYSIS_PROMPT.to_string(),
            image_data_url: payload.data_url(),
        }
    }
}

/// Wire boundary to the external model provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionApi: Send + Sync {
    /// Returns the model's free-text answer.
    async fn complete(&self, request: &VisionRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiVisionApi {
    client: reqwest::Client,
    settings: ApiSettings,
}

impl OpenAiVisionApi {
    pub fn new(settings: ApiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl VisionApi for OpenAiVisionApi {
    async fn complete(&self, request: &VisionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.settings.base_url);
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.prompt },
                        { "type": "image_url", "image_url": { "url": request.image_data_url } }
                    ]
                }
            ],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, text));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ChartError::ApiTimeout
            } else {
                ChartError::ApiRequest(format!("failed to parse model response: {}", e))
            }
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ChartError::ApiRequest("model response has no content".to_string()))
    }
}

fn map_send_error(err: reqwest::Error) -> ChartError {
    if err.is_timeout() {
        ChartError::ApiTimeout
    } else {
        ChartError::ApiServer {
            status: None,
            message: err.to_string(),
        }
    }
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ChartError {
    let message = truncate(&body, 300);
    if status == StatusCode::TOO_MANY_REQUESTS {
        ChartError::ApiRateLimit { retry_after }
    } else if status.is_server_error() {
        ChartError::ApiServer {
            status: Some(status.as_u16()),
            message,
        }
    } else {
        ChartError::ApiRequest(format!("{}: {}", status, message))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Sends chart images to the model API and parses the answers.
#[derive(Clone)]
pub struct InterpretationClient {
    api: Arc<dyn VisionApi>,
    parser: Arc<dyn ResponseParser>,
    max_retries: usize,
    backoff_base_ms: u64,
}

impl InterpretationClient {
    pub fn new(api: Arc<dyn VisionApi>, settings: &ApiSettings) -> Self {
        Self {
            api,
            parser: Arc::new(SectionParser),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// At most `max_retries + 1` calls; only rate limits, server errors and timeouts are retried.
    pub async fn interpret(&self, payload: &ImagePayload) -> Result<AnalysisResult> {
        let request = VisionRequest::for_payload(payload);
        info!(
            stage = "interpret",
            format = %payload.format,
            bytes = payload.bytes.len(),
            "sending chart to model API"
        );

        // base, 2*base, 4*base, ... capped
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.backoff_base_ms / 2).max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.max_retries);

        let text = RetryIf::spawn(
            strategy,
            || self.api.complete(&request),
            |err: &ChartError| {
                let retry = err.is_transient();
                if retry {
                    warn!(stage = "interpret", kind = err.kind(), error = %err, "model API call failed, backing off");
                }
                retry
            },
        )
        .await
        .map_err(|e| {
            warn!(stage = "interpret", kind = e.kind(), error = %e, "model API call gave up");
            e
        })?;

        let result = self.parser.parse(&text);
        debug!(
            stage = "interpret",
            structured = !result.chart_type.is_empty() || !result.trends.is_empty(),
            "model answer parsed"
        );
        Ok(result)
    }
}
