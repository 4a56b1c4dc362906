//! Batch crawl requests and the collaborator that executes them
//!
//! A task's payload is a [`BatchCrawlRequest`]: a list of start URLs that
//! share one set of [`CrawlSettings`]. The scheduler hands it to a
//! [`BatchCrawler`]; the default one, [`SessionBatchCrawler`], runs one
//! orchestrator session per URL.

use crate::crawler::{CrawlRequest, CrawlSession, CrawlSettings, Orchestrator};
use crate::state::SessionStatus;
use crate::HarvestError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use url::Url;

/// Knobs controlling how a batch is executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Sessions run at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between groups of sessions, in milliseconds
    #[serde(default = "default_delay")]
    pub delay: u64,

    /// Extra attempts per URL after a failed session
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Drop repeated URLs (ignoring fragments) before crawling
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,

    /// Minimum quality score (0-100) for a session to count as a success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,
}

fn default_concurrency() -> usize {
    5
}

fn default_delay() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay: default_delay(),
            retries: default_retries(),
            enable_deduplication: true,
            quality_threshold: None,
        }
    }
}

/// The payload of a crawl task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCrawlRequest {
    pub urls: Vec<String>,

    #[serde(default)]
    pub config: CrawlSettings,

    #[serde(default)]
    pub options: BatchOptions,
}

impl BatchCrawlRequest {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            config: CrawlSettings::default(),
            options: BatchOptions::default(),
        }
    }

    /// The URLs to crawl, in order, with repeats dropped if enabled
    pub fn effective_urls(&self) -> Vec<String> {
        if !self.options.enable_deduplication {
            return self.urls.clone();
        }

        let mut seen = HashSet::new();
        self.urls
            .iter()
            .filter(|url| seen.insert(dedup_key(url)))
            .cloned()
            .collect()
    }
}

fn dedup_key(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Outcome of one start URL within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCrawlResult {
    pub url: String,
    pub success: bool,

    /// True when the session ran but scored under the quality threshold
    #[serde(default)]
    pub skipped: bool,
    pub session_id: Option<String>,
    pub pages_processed: u32,
    pub quality_score: Option<f64>,
    pub error: Option<String>,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

/// Aggregate outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCrawlResult {
    pub total_urls: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub results: Vec<UrlCrawlResult>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_time_ms: u64,
}

impl BatchCrawlResult {
    fn from_results(
        total_urls: usize,
        results: Vec<UrlCrawlResult>,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let skipped_count = results.iter().filter(|r| r.skipped).count();
        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count - skipped_count;

        Self {
            total_urls,
            success_count,
            failure_count,
            skipped_count,
            results,
            start_time,
            end_time: Utc::now(),
            total_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Returns true if at least one URL was attempted and every one failed
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.failure_count == self.results.len()
    }
}

/// Share of successful pages in a session, 0-100
pub fn quality_score(session: &CrawlSession) -> f64 {
    let attempted = session.pages_processed as usize + session.errors.len();
    if attempted == 0 {
        return 0.0;
    }
    session.pages_processed as f64 / attempted as f64 * 100.0
}

/// Executes the payload of a crawl task
#[async_trait]
pub trait BatchCrawler: Send + Sync {
    /// Crawls every URL of the request
    ///
    /// # Returns
    ///
    /// * `Ok(BatchCrawlResult)` - At least one URL did not fail
    /// * `Err(HarvestError)` - The batch failed as a whole
    async fn batch_crawl(&self, request: &BatchCrawlRequest) -> Result<BatchCrawlResult, HarvestError>;
}

/// Runs one orchestrator session per start URL
#[derive(Clone)]
pub struct SessionBatchCrawler {
    orchestrator: Orchestrator,
}

impl SessionBatchCrawler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    async fn crawl_url(&self, url: String, request: &BatchCrawlRequest) -> UrlCrawlResult {
        let started = Instant::now();
        let max_attempts = request.options.retries.saturating_add(1);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let crawl = CrawlRequest::with_settings(url.clone(), request.config.clone());

            match self.orchestrator.run_to_completion(crawl).await {
                Ok(session) => match session_failure(&session) {
                    None => break Ok(session),
                    Some(reason) if attempts >= max_attempts => break Err((Some(session), reason)),
                    Some(reason) => {
                        tracing::debug!(
                            session_id = %session.id,
                            "Attempt {} for {} failed: {}",
                            attempts,
                            url,
                            reason
                        );
                        self.orchestrator.remove_session(&session.id);
                    }
                },
                // Rejected requests fail the same way every time
                Err(e @ HarvestError::InvalidInput(_)) => break Err((None, e.to_string())),
                Err(e) if attempts >= max_attempts => break Err((None, e.to_string())),
                Err(e) => tracing::debug!("Attempt {} for {} failed: {}", attempts, url, e),
            }

            if request.options.delay > 0 {
                tokio::time::sleep(Duration::from_millis(request.options.delay)).await;
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(session) => {
                let score = quality_score(&session);
                let below = request
                    .options
                    .quality_threshold
                    .map_or(false, |threshold| score < threshold);

                UrlCrawlResult {
                    url,
                    success: !below,
                    skipped: below,
                    session_id: Some(session.id.clone()),
                    pages_processed: session.pages_processed,
                    quality_score: Some(score),
                    error: below.then(|| format!("Quality score {:.2} below threshold", score)),
                    attempts,
                    execution_time_ms,
                }
            }
            Err((session, error)) => UrlCrawlResult {
                url,
                success: false,
                skipped: false,
                session_id: session.as_ref().map(|s| s.id.clone()),
                pages_processed: session.as_ref().map_or(0, |s| s.pages_processed),
                quality_score: session.as_ref().map(quality_score),
                error: Some(error),
                attempts,
                execution_time_ms,
            },
        };

        // The summary is already persisted; drop the live session and its media index
        if let Some(session_id) = &result.session_id {
            self.orchestrator.remove_session(session_id);
        }

        result
    }
}

fn session_failure(session: &CrawlSession) -> Option<String> {
    match session.status {
        SessionStatus::Completed if session.pages_processed > 0 => None,
        SessionStatus::Completed => Some(
            session
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| "No pages were processed".to_string()),
        ),
        SessionStatus::Failed => Some(
            session
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| "Session failed".to_string()),
        ),
        SessionStatus::Stopped => Some("Session was stopped".to_string()),
        SessionStatus::Running => Some("Session did not finish".to_string()),
    }
}

#[async_trait]
impl BatchCrawler for SessionBatchCrawler {
    async fn batch_crawl(&self, request: &BatchCrawlRequest) -> Result<BatchCrawlResult, HarvestError> {
        let start_time = Utc::now();
        let started = Instant::now();
        let urls = request.effective_urls();
        let concurrency = request.options.concurrency.max(1);

        if urls.is_empty() {
            return Err(HarvestError::InvalidInput("Batch has no URLs".to_string()));
        }

        tracing::info!(
            "Starting batch of {} URLs ({} after dedup), {} at a time",
            request.urls.len(),
            urls.len(),
            concurrency
        );

        let chunks: Vec<&[String]> = urls.chunks(concurrency).collect();
        let mut results = Vec::with_capacity(urls.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let runs = chunk.iter().map(|url| self.crawl_url(url.clone(), request));
            results.extend(join_all(runs).await);

            if index + 1 < chunks.len() && request.options.delay > 0 {
                tokio::time::sleep(Duration::from_millis(request.options.delay)).await;
            }
        }

        let result = BatchCrawlResult::from_results(request.urls.len(), results, start_time, started.elapsed());

        tracing::info!(
            "Batch finished: {} succeeded, {} failed, {} skipped",
            result.success_count,
            result.failure_count,
            result.skipped_count
        );

        if result.all_failed() {
            let first = result
                .results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_default();
            return Err(HarvestError::TaskExecution(format!(
                "All {} URLs failed; first error: {}",
                result.results.len(),
                first
            )));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(pages: u32, errors: usize, status: SessionStatus) -> CrawlSession {
        let url = Url::parse("https://example.com/").unwrap();
        let mut session = CrawlSession::new("s1".to_string(), &url, &CrawlSettings::default());
        session.pages_processed = pages;
        session.errors = (0..errors).map(|i| format!("error {}", i)).collect();
        session.status = status;
        session
    }

    #[test]
    fn test_effective_urls_drops_fragments_and_repeats() {
        let request = BatchCrawlRequest::new(vec![
            "https://example.com/a".to_string(),
            "https://example.com/a#top".to_string(),
            "https://example.com/b".to_string(),
            "https://example.com/a".to_string(),
        ]);
        assert_eq!(
            request.effective_urls(),
            vec!["https://example.com/a".to_string(), "https://example.com/b".to_string()]
        );
    }

    #[test]
    fn test_effective_urls_without_dedup() {
        let mut request = BatchCrawlRequest::new(vec![
            "https://example.com/a".to_string(),
            "https://example.com/a".to_string(),
        ]);
        request.options.enable_deduplication = false;
        assert_eq!(request.effective_urls().len(), 2);
    }

    #[test]
    fn test_quality_score() {
        assert_eq!(quality_score(&session(3, 1, SessionStatus::Completed)), 75.0);
        assert_eq!(quality_score(&session(0, 0, SessionStatus::Completed)), 0.0);
        assert_eq!(quality_score(&session(5, 0, SessionStatus::Completed)), 100.0);
    }

    #[test]
    fn test_session_failure() {
        assert!(session_failure(&session(2, 0, SessionStatus::Completed)).is_none());
        assert_eq!(
            session_failure(&session(0, 1, SessionStatus::Completed)).as_deref(),
            Some("error 0")
        );
        assert!(session_failure(&session(2, 0, SessionStatus::Stopped)).is_some());
        assert!(session_failure(&session(0, 0, SessionStatus::Failed)).is_some());
    }

    #[test]
    fn test_result_counts() {
        let result = |success, skipped| UrlCrawlResult {
            url: "https://example.com/".to_string(),
            success,
            skipped,
            session_id: None,
            pages_processed: 0,
            quality_score: None,
            error: None,
            attempts: 1,
            execution_time_ms: 0,
        };
        let batch = BatchCrawlResult::from_results(
            4,
            vec![result(true, false), result(false, true), result(false, false)],
            Utc::now(),
            Duration::from_millis(5),
        );

        assert_eq!(batch.total_urls, 4);
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.skipped_count, 1);
        assert_eq!(batch.failure_count, 1);
        assert!(!batch.all_failed());

        let failed = BatchCrawlResult::from_results(1, vec![result(false, false)], Utc::now(), Duration::ZERO);
        assert!(failed.all_failed());
    }

    #[test]
    fn test_options_from_partial_json() {
        let request: BatchCrawlRequest =
            serde_json::from_str(r#"{"urls":["https://example.com/"],"options":{"concurrency":2}}"#).unwrap();
        assert_eq!(request.options.concurrency, 2);
        assert_eq!(request.options.delay, 1000);
        assert!(request.options.enable_deduplication);
        assert_eq!(request.config.max_pages, 10);
    }
}
