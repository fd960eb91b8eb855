use std::time::Duration;

use reqwest::redirect::Policy;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PipelineSettings;
use crate::error::{ChartError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const TIMEOUT_RETRY_DELAY_MS: u64 = 250;

/// Page body plus the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    pub final_url: Url,
    pub body: String,
}

/// Shared HTTP client for page and image downloads. Follows at most
/// `max_redirects` hops.
pub fn build_http_client(settings: &PipelineSettings) -> anyhow::Result<reqwest::Client> {
    // reqwest's limit also counts the URL about to be requested
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(Policy::limited(settings.max_redirects + 1))
        .connect_timeout(settings.fetch_timeout)
        .build()?;
    Ok(client)
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    retries: usize,
    max_redirects: usize,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, settings: &PipelineSettings) -> Self {
        Self {
            client,
            timeout: settings.fetch_timeout,
            retries: settings.fetch_retries,
            max_redirects: settings.max_redirects,
        }
    }

    /// Downloads a page. Timeouts are re-attempted `retries` times; other failures are not.
    pub async fn fetch(&self, url: &Url) -> Result<HtmlDocument> {
        ensure_http(url)?;
        info!(stage = "fetch", url = %url, "fetching page");

        let strategy = FixedInterval::from_millis(TIMEOUT_RETRY_DELAY_MS).take(self.retries);
        let result = RetryIf::spawn(
            strategy,
            || self.fetch_once(url),
            |err: &ChartError| {
                let retry = matches!(err, ChartError::Timeout(_));
                if retry {
                    warn!(stage = "fetch", url = %url, "page fetch timed out, retrying");
                }
                retry
            },
        )
        .await;

        if let Err(e) = &result {
            warn!(stage = "fetch", url = %url, kind = e.kind(), error = %e, "page fetch failed");
        }
        result
    }

    async fn fetch_once(&self, url: &Url) -> Result<HtmlDocument> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, url, self.max_redirects))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChartError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, url, self.max_redirects))?;

        debug!(stage = "fetch", url = %final_url, bytes = body.len(), "page fetched");
        Ok(HtmlDocument { final_url, body })
    }
}

pub(crate) fn ensure_http(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ChartError::Network(format!("unsupported URL scheme: {}", other))),
    }
}

/// Maps a reqwest failure onto the timeout/redirect/network classes.
pub(crate) fn map_transport_error(err: reqwest::Error, url: &Url, max_redirects: usize) -> ChartError {
    if err.is_timeout() {
        ChartError::Timeout(url.to_string())
    } else if err.is_redirect() {
        ChartError::TooManyRedirects {
            limit: max_redirects,
            url: url.to_string(),
        }
    } else {
        ChartError::Network(err.to_string())
    }
}
