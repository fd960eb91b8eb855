use tracing::{info, warn};
use url::Url;

use crate::api_client::InterpretationClient;
use crate::config::PipelineSettings;
use crate::error::{ChartError, Result};
use crate::fetcher::Fetcher;
use crate::loader::ImageLoader;
use crate::locator::{Candidates, ImageLocator};
use crate::models::{AnalysisResult, CandidateImage, ChartSource, ImagePayload};

/// Result of one chart request, ready for formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub analysis: AnalysisResult,
    /// Caption or alt text of the page image, if any.
    pub label: Option<String>,
    /// Image URL when the chart came from a page.
    pub image_url: Option<Url>,
}

/// URL path: fetch → locate → load → interpret. Attachment path: load → interpret.
pub struct ChartPipeline {
    fetcher: Fetcher,
    locator: ImageLocator,
    loader: ImageLoader,
    interpreter: InterpretationClient,
    max_candidate_attempts: usize,
}

impl ChartPipeline {
    pub fn new(
        settings: &PipelineSettings,
        http: reqwest::Client,
        interpreter: InterpretationClient,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(http.clone(), settings),
            locator: ImageLocator::new(settings.min_image_area),
            loader: ImageLoader::new(http, settings),
            interpreter,
            max_candidate_attempts: settings.max_candidate_attempts.max(1),
        }
    }

    pub async fn run(&self, source: ChartSource) -> Result<PipelineOutcome> {
        match source {
            ChartSource::Image {
                bytes,
                declared_mime,
            } => {
                info!(stage = "load", bytes = bytes.len(), "validating attached image");
                let payload = self.loader.validate(bytes, declared_mime.as_deref())?;
                let analysis = self.interpreter.interpret(&payload).await?;
                Ok(PipelineOutcome {
                    analysis,
                    label: None,
                    image_url: None,
                })
            }
            ChartSource::Url(url) => {
                let document = self.fetcher.fetch(&url).await?;
                let candidates = self.locator.locate(&document.body, &document.final_url);
                info!(stage = "locate", url = %document.final_url, candidates = candidates.len(), "located images");

                let (candidate, payload) = self.load_best(&candidates).await?;
                let analysis = self.interpreter.interpret(&payload).await?;
                Ok(PipelineOutcome {
                    analysis,
                    label: candidate.label().map(str::to_string),
                    image_url: Some(candidate.url),
                })
            }
        }
    }

    /// Walks candidates in rank order and returns the first that loads.
    async fn load_best(&self, candidates: &Candidates) -> Result<(CandidateImage, ImagePayload)> {
        let mut last_error = None;
        for candidate in candidates.ranked().into_iter().take(self.max_candidate_attempts) {
            match self.loader.load(&candidate).await {
                Ok(payload) => return Ok((candidate, payload)),
                Err(e) => {
                    warn!(stage = "load", url = %candidate.url, kind = e.kind(), error = %e, "candidate image rejected");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ChartError::NoImageFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockVisionApi;
    use crate::config::ApiSettings;
    use crate::fetcher::build_http_client;
    use crate::testing::{png_bytes, Route, TestServer};
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline(mock: MockVisionApi, attempts: usize) -> ChartPipeline {
        let settings = PipelineSettings {
            fetch_timeout: Duration::from_millis(500),
            image_timeout: Duration::from_millis(500),
            max_candidate_attempts: attempts,
            ..PipelineSettings::default()
        };
        let api = ApiSettings {
            max_retries: 0,
            ..ApiSettings::new("test")
        };
        let interpreter = InterpretationClient::new(Arc::new(mock), &api);
        ChartPipeline::new(&settings, build_http_client(&settings).unwrap(), interpreter)
    }

    fn answering_mock() -> MockVisionApi {
        let mut mock = MockVisionApi::new();
        mock.expect_complete()
            .returning(|_| Ok("Chart Type: Line\nInterpretation: rising".into()));
        mock
    }

    #[tokio::test]
    async fn page_without_images_is_no_image_found() {
        let server = TestServer::start(vec![("/", Route::html("<p>text only</p>"))]).await;
        let mut mock = MockVisionApi::new();
        mock.expect_complete().never();

        let err = pipeline(mock, 3).run(ChartSource::Url(server.url("/"))).await.unwrap_err();
        assert!(matches!(err, ChartError::NoImageFound));
    }

    #[tokio::test]
    async fn falls_back_to_next_candidate_when_best_fails() {
        let html = r#"<figure><img src="/broken.png" width="1000" height="800"></figure>
                      <figure><img src="/ok.png" width="800" height="600"><figcaption>Figure 2</figcaption></figure>"#;
        let server = TestServer::start(vec![
            ("/page", Route::html(html)),
            ("/broken.png", Route::ok("image/png", "garbage")),
            ("/ok.png", Route::ok("image/png", png_bytes(80, 60))),
        ])
        .await;

        let outcome = pipeline(answering_mock(), 3)
            .run(ChartSource::Url(server.url("/page")))
            .await
            .unwrap();
        assert_eq!(outcome.label.as_deref(), Some("Figure 2"));
        assert_eq!(outcome.image_url, Some(server.url("/ok.png")));
        assert_eq!(outcome.analysis.chart_type, "Line");
    }

    #[tokio::test]
    async fn candidate_attempts_are_capped() {
        let html = r#"<img src="/a.png"><img src="/b.png"><img src="/c.png">"#;
        let server = TestServer::start(vec![("/page", Route::html(html))]).await;
        let mut mock = MockVisionApi::new();
        mock.expect_complete().never();

        let err = pipeline(mock, 2).run(ChartSource::Url(server.url("/page"))).await.unwrap_err();
        assert!(matches!(err, ChartError::Download(_)));
        assert_eq!(server.hits("/a.png") + server.hits("/b.png"), 2);
        assert_eq!(server.hits("/c.png"), 0);
    }

    #[tokio::test]
    async fn unsupported_formats_do_not_use_up_attempts() {
        let html = r#"<img src="/a.webp" width="1600" height="900">
                      <img src="/b.webp" width="1600" height="900">
                      <img src="/c.webp" width="1600" height="900">
                      <img src="/chart.png" width="800" height="600">"#;
        let server = TestServer::start(vec![
            ("/page", Route::html(html)),
            ("/chart.png", Route::ok("image/png", png_bytes(80, 60))),
        ])
        .await;

        let outcome = pipeline(answering_mock(), 1)
            .run(ChartSource::Url(server.url("/page")))
            .await
            .unwrap();
        assert_eq!(outcome.image_url, Some(server.url("/chart.png")));
        assert_eq!(server.hits("/a.webp"), 0);
    }

    #[tokio::test]
    async fn attachment_skips_the_page_stages() {
        let outcome = pipeline(answering_mock(), 3)
            .run(ChartSource::Image {
                bytes: png_bytes(30, 20),
                declared_mime: Some("image/png".into()),
            })
            .await
            .unwrap();
        assert_eq!(outcome.analysis.interpretation, "rising");
        assert!(outcome.image_url.is_none());
    }
}
