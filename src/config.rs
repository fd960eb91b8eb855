use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub api: ApiSettings,
    pub pipeline: PipelineSettings,
    pub log_level: String,
}

/// Model API connection settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
}

/// Limits and heuristics for the fetch/locate/load pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub fetch_retries: usize,
    pub image_timeout: Duration,
    pub max_redirects: usize,
    pub max_image_bytes: usize,
    pub min_image_area: u64,
    pub max_candidate_attempts: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(20),
            fetch_retries: 1,
            image_timeout: Duration::from_secs(20),
            max_redirects: 5,
            max_image_bytes: 20 * 1024 * 1024,
            min_image_area: 200 * 200,
            max_candidate_attempts: 3,
        }
    }
}

impl ApiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineSettings::default();
        let mut api = ApiSettings::new(
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable is required")?,
        );
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            api.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = env::var("OPENAI_MODEL") {
            api.model = model;
        }
        api.max_tokens = env_or("OPENAI_MAX_TOKENS", api.max_tokens)?;
        api.temperature = env_or("OPENAI_TEMPERATURE", api.temperature)?;
        api.timeout = Duration::from_secs(env_or("API_TIMEOUT_SECS", api.timeout.as_secs())?);
        api.max_retries = env_or("API_MAX_RETRIES", api.max_retries)?;
        api.backoff_base_ms = env_or("API_BACKOFF_BASE_MS", api.backoff_base_ms)?;

        let pipeline = PipelineSettings {
            fetch_timeout: Duration::from_secs(env_or(
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            fetch_retries: env_or("FETCH_RETRIES", defaults.fetch_retries)?,
            image_timeout: Duration::from_secs(env_or(
                "IMAGE_TIMEOUT_SECS",
                defaults.image_timeout.as_secs(),
            )?),
            max_redirects: env_or("MAX_REDIRECTS", defaults.max_redirects)?,
            max_image_bytes: env_or("MAX_IMAGE_BYTES", defaults.max_image_bytes)?,
            min_image_area: env_or("MIN_IMAGE_AREA", defaults.min_image_area)?,
            max_candidate_attempts: env_or("MAX_CANDIDATE_ATTEMPTS", defaults.max_candidate_attempts)?
                .max(1),
        };

        Ok(Self {
            telegram_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN environment variable is required")?,
            api,
            pipeline,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => parse_setting(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, raw))
}
