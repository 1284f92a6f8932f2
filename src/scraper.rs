use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, Clock};
use crate::config::ScraperConfig;
use crate::extractor::{PriceExtractor, ScrapeResult};
use crate::utils::error::{AppError, Result};

/// Outcome of one fetch pipeline run for a single URL.
///
/// `Blocked` and `NetworkError` are the transient per-attempt conditions;
/// the retry loop absorbs them and reports `RetriesExhausted` once the
/// attempt budget runs out. `ExtractionFailure` is terminal immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(ScrapeResult),
    Blocked,
    NetworkError,
    ExtractionFailure,
    RetriesExhausted,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::Blocked => "blocked",
            FetchOutcome::NetworkError => "network_error",
            FetchOutcome::ExtractionFailure => "extraction_failure",
            FetchOutcome::RetriesExhausted => "retries_exhausted",
        }
    }
}

const CAPTCHA_VALIDATION_PATH: &str = "/errors/validatecaptcha";

/// Classifies a raw HTTP response as a bot challenge versus usable content.
pub struct BlockDetector {
    dump_dir: Option<PathBuf>,
}

impl BlockDetector {
    pub fn new(dump_dir: Option<PathBuf>) -> Self {
        Self { dump_dir }
    }

    pub fn is_blocked(&self, status: u16, body: &str, final_url: &str) -> bool {
        if status != 200 {
            return true;
        }

        let lower = body.to_lowercase();
        if lower.contains("captcha") || lower.contains("enter the characters you see below") {
            return true;
        }

        match url::Url::parse(final_url) {
            Ok(parsed) => parsed.path().contains(CAPTCHA_VALIDATION_PATH),
            Err(_) => final_url.contains(CAPTCHA_VALIDATION_PATH),
        }
    }

    /// Best-effort dump of a blocked response body for offline inspection.
    /// Never fails the fetch; IO problems are only logged.
    pub fn dump_blocked(&self, body: &str, attempt: u32) -> Option<PathBuf> {
        let dir = self.dump_dir.as_ref()?;

        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not create dump directory");
            return None;
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("blocked_{}_attempt{}.html", timestamp, attempt));
        match std::fs::write(&path, body) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write dump file");
                None
            }
        }
    }
}

/// Seam between the bulk runner and the HTTP fetching machinery, so the
/// runner can be exercised with scripted outcomes in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Fetch + block detection + backoff + extraction for one URL.
pub struct FetchPipeline {
    client: reqwest::Client,
    backoff: BackoffPolicy,
    block_detector: BlockDetector,
    extractor: PriceExtractor,
    clock: Arc<dyn Clock>,
}

enum AttemptFailure {
    Blocked,
    Network,
}

impl FetchPipeline {
    pub fn new(config: &ScraperConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| AppError::Internal(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| AppError::Internal(format!("invalid accept-language: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let dump_dir = config
            .dump_blocked_html
            .then(|| PathBuf::from(&config.dump_dir));

        Ok(Self {
            client,
            backoff: BackoffPolicy::new(
                config.max_attempts,
                Duration::from_secs(config.initial_backoff_secs),
            ),
            block_detector: BlockDetector::new(dump_dir),
            extractor: PriceExtractor::new(),
            clock,
        })
    }

    /// One HTTP attempt. `Ok` carries the final outcome for the whole
    /// fetch; `Err` carries a transient failure for the retry loop.
    async fn attempt(&self, url: &str, attempt: u32) -> std::result::Result<FetchOutcome, AttemptFailure> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, attempt, error = %e, "transport failure");
                return Err(AttemptFailure::Network);
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url, attempt, error = %e, "failed reading response body");
                return Err(AttemptFailure::Network);
            }
        };

        if self.block_detector.is_blocked(status, &body, &final_url) {
            tracing::warn!(url, attempt, status, "blocked or challenged response");
            self.block_detector.dump_blocked(&body, attempt);
            return Err(AttemptFailure::Blocked);
        }

        match self.extractor.extract(&body) {
            Some(result) => Ok(FetchOutcome::Success(result)),
            // Markup mismatch is not transient: retrying wastes the budget
            None => {
                tracing::warn!(url, attempt, "could not extract title or price");
                Ok(FetchOutcome::ExtractionFailure)
            }
        }
    }
}

#[async_trait]
impl Fetcher for FetchPipeline {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        for attempt in 1..=self.backoff.max_attempts() {
            tracing::debug!(url, attempt, "fetching product page");

            let failure = match self.attempt(url, attempt).await {
                Ok(outcome) => return outcome,
                Err(failure) => failure,
            };

            if !self.backoff.should_retry(attempt) {
                return match failure {
                    AttemptFailure::Blocked | AttemptFailure::Network => {
                        FetchOutcome::RetriesExhausted
                    }
                };
            }

            let delay = self.backoff.delay_for(attempt);
            tracing::debug!(url, attempt, delay_secs = delay.as_secs(), "backing off");
            self.clock.sleep(delay).await;
        }

        FetchOutcome::RetriesExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_200_is_blocked() {
        let detector = BlockDetector::new(None);
        assert!(detector.is_blocked(503, "service unavailable", "https://example.com/item"));
        assert!(detector.is_blocked(404, "", "https://example.com/item"));
    }

    #[test]
    fn test_captcha_body_is_blocked() {
        let detector = BlockDetector::new(None);
        assert!(detector.is_blocked(
            200,
            "<html>Please solve this CAPTCHA to continue</html>",
            "https://example.com/item"
        ));
        assert!(detector.is_blocked(
            200,
            "<html>Enter the characters you see below</html>",
            "https://example.com/item"
        ));
    }

    #[test]
    fn test_captcha_redirect_is_blocked() {
        let detector = BlockDetector::new(None);
        assert!(detector.is_blocked(
            200,
            "<html>nothing suspicious here</html>",
            "https://example.com/errors/validatecaptcha?x=1"
        ));
    }

    #[test]
    fn test_plain_page_is_not_blocked() {
        let detector = BlockDetector::new(None);
        assert!(!detector.is_blocked(
            200,
            "<html><span id=\"productTitle\">Widget</span></html>",
            "https://example.com/item"
        ));
    }

    #[test]
    fn test_dump_disabled_returns_none() {
        let detector = BlockDetector::new(None);
        assert!(detector.dump_blocked("<html></html>", 1).is_none());
    }

    #[test]
    fn test_dump_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let detector = BlockDetector::new(Some(dir.path().to_path_buf()));

        let path = detector.dump_blocked("<html>blocked</html>", 2).unwrap();
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "<html>blocked</html>");
        assert!(path.file_name().unwrap().to_string_lossy().contains("attempt2"));
    }

    #[test]
    fn test_outcome_kinds() {
        assert_eq!(FetchOutcome::Blocked.kind(), "blocked");
        assert_eq!(FetchOutcome::NetworkError.kind(), "network_error");
        assert_eq!(FetchOutcome::ExtractionFailure.kind(), "extraction_failure");
        assert_eq!(FetchOutcome::RetriesExhausted.kind(), "retries_exhausted");
        assert!(!FetchOutcome::Blocked.is_success());
    }
}
