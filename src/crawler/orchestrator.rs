//! Crawl session orchestrator
//!
//! Drives one session's life cycle:
//! - leases a browser for the whole session
//! - pulls links from the session's frontier, shallowest first
//! - fetches and extracts each page, stores the page record (and capture)
//! - runs the media pipeline when the session collects media
//! - re-seeds the frontier with the page's links under the session policy
//!
//! A page failure is recorded in `session.errors` and the loop moves on. Only
//! failing to lease a browser (or the session task dying) fails the session.

use super::session::{CrawlRequest, CrawlResponse, CrawlSession, SessionRegistry};
use crate::browser::{BrowserError, BrowserLease, BrowserPool, NavigateOptions, Page, PoolStats};
use crate::frontier::{Frontier, FrontierEntry};
use crate::media::{self, MediaCatalog, MediaDownloader, MediaOptions};
use crate::state::SessionStatus;
use crate::storage::paths::{page_record_key, screenshot_key, session_metadata_key};
use crate::storage::{self, ObjectStore, SessionRecord, SharedMetadataStore};
use crate::url::{parse_start_url, LinkPolicy};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

/// Stored page document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageRecord<'a> {
    url: &'a str,
    title: Option<&'a str>,
    content: &'a str,
    metadata: PageMetadata<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageMetadata<'a> {
    depth: u32,
    parent_url: Option<&'a str>,
    final_url: &'a str,
    crawled_at: DateTime<Utc>,
    content_type: Option<&'a str>,
    status_code: Option<u16>,
    links_found: usize,
}

/// A validated request, ready to run
struct PreparedSession {
    session: CrawlSession,
    start: Url,
    policy: LinkPolicy,
}

struct Inner {
    pool: BrowserPool,
    sessions: SessionRegistry,
    downloader: MediaDownloader,
    catalog: MediaCatalog,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    metadata: SharedMetadataStore,
    navigation: NavigateOptions,
}

/// Runs crawl sessions against a shared browser pool
///
/// Cheap to clone; clones share the pool, the session registry and the
/// media pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `pool` - Browser pool sessions lease from
    /// * `client` - HTTP client used for media downloads
    /// * `objects` - Object store for page records, captures and media
    /// * `bucket` - Bucket every object is written to
    /// * `metadata` - Store for session summaries
    /// * `navigation` - Per-page navigation options
    pub fn new(
        pool: BrowserPool,
        client: Client,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        metadata: SharedMetadataStore,
        navigation: NavigateOptions,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            inner: Arc::new(Inner {
                pool,
                sessions: SessionRegistry::new(),
                downloader: MediaDownloader::new(client, objects.clone(), bucket.clone()),
                catalog: MediaCatalog::new(objects.clone(), bucket.clone()),
                objects,
                bucket,
                metadata,
                navigation,
            }),
        }
    }

    /// Starts a session in the background
    ///
    /// Returns at once. An invalid request yields a `failed` response and no
    /// session is registered; otherwise the session runs to completion on
    /// its own task and is queryable through [`get_session`](Self::get_session).
    pub fn start_crawl(&self, request: CrawlRequest) -> CrawlResponse {
        let session_id = Uuid::new_v4().to_string();

        let prepared = match prepare(session_id.clone(), &request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Rejected crawl request for {}: {}", request.start_url, e);
                return CrawlResponse::failed(session_id, e.to_string());
            }
        };

        self.inner.sessions.insert(prepared.session.clone());

        let orchestrator = self.clone();
        let run = tokio::spawn(async move { orchestrator.run_session(prepared).await });

        // Guard against the session task dying without reaching a terminal state
        let sessions = self.inner.sessions.clone();
        let guarded_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = run.await {
                tracing::error!(session_id = %guarded_id, "Session task aborted: {}", e);
                sessions.update(&guarded_id, |s| {
                    if s.status == SessionStatus::Running {
                        s.status = SessionStatus::Failed;
                        s.end_time = Some(Utc::now());
                        s.errors.push(format!("Session task aborted: {}", e));
                    }
                });
            }
        });

        tracing::info!(session_id = %session_id, "Started crawl of {}", request.start_url);
        CrawlResponse::started(session_id)
    }

    /// Runs a session on the current task and returns its final snapshot
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSession)` - The session in its terminal state
    /// * `Err(HarvestError::InvalidInput)` - The request was rejected
    pub async fn run_to_completion(&self, request: CrawlRequest) -> Result<CrawlSession> {
        let prepared = prepare(Uuid::new_v4().to_string(), &request)?;
        self.inner.sessions.insert(prepared.session.clone());
        Ok(self.run_session(prepared).await)
    }

    /// Snapshot of a session, `None` for unknown ids
    pub fn get_session(&self, session_id: &str) -> Option<CrawlSession> {
        self.inner.sessions.get(session_id)
    }

    /// Sessions still running
    pub fn active_sessions(&self) -> Vec<CrawlSession> {
        self.inner.sessions.active()
    }

    /// Asks a running session to stop
    ///
    /// The loop notices at its next iteration; the page in flight finishes.
    ///
    /// # Returns
    ///
    /// `true` if the session was running
    pub fn stop_session(&self, session_id: &str) -> bool {
        let stopped = self
            .inner
            .sessions
            .update(session_id, |s| {
                if s.status == SessionStatus::Running {
                    s.status = SessionStatus::Stopped;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if stopped {
            tracing::info!(session_id, "Stop requested");
        }
        stopped
    }

    /// Evicts a finished session with its media collection
    ///
    /// # Returns
    ///
    /// `false` for unknown or still-running sessions
    pub fn remove_session(&self, session_id: &str) -> bool {
        let finished = self
            .inner
            .sessions
            .read(session_id, |s| s.status.is_terminal() && s.end_time.is_some())
            .unwrap_or(false);

        if !finished {
            return false;
        }

        self.inner.sessions.remove(session_id);
        self.inner.catalog.cleanup_session(session_id);
        let released = self.inner.downloader.cleanup_session(session_id);
        tracing::info!(
            session_id,
            "Session removed, released {} content hashes",
            released
        );
        true
    }

    pub fn catalog(&self) -> &MediaCatalog {
        &self.inner.catalog
    }

    pub fn downloader(&self) -> &MediaDownloader {
        &self.inner.downloader
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    async fn run_session(&self, prepared: PreparedSession) -> CrawlSession {
        let session_id = prepared.session.id.clone();
        let span = tracing::info_span!("session", session_id = %session_id);

        async move {
            let mut frontier = Frontier::new();
            let outcome = self.crawl_loop(&prepared, &mut frontier).await;
            let ended_at = Utc::now();

            let snapshot = self
                .inner
                .sessions
                .update(&session_id, |s| {
                    match &outcome {
                        Ok(()) if s.status == SessionStatus::Running => {
                            s.status = SessionStatus::Completed;
                        }
                        Ok(()) => {}
                        Err(e) => {
                            s.status = SessionStatus::Failed;
                            s.errors.push(e.to_string());
                        }
                    }
                    s.end_time = Some(ended_at);
                    s.total_pages = s.pages_processed;
                    s.clone()
                })
                .unwrap_or_else(|| prepared.session.clone());

            self.persist_summary(&snapshot, &frontier).await;

            match &outcome {
                Ok(()) => tracing::info!(
                    "Session {} with {} pages processed and {} errors",
                    snapshot.status,
                    snapshot.pages_processed,
                    snapshot.errors.len()
                ),
                Err(e) => tracing::error!("Session failed: {}", e),
            }

            snapshot
        }
        .instrument(span)
        .await
    }

    async fn crawl_loop(&self, prepared: &PreparedSession, frontier: &mut Frontier) -> Result<()> {
        let session_id = prepared.session.id.as_str();
        let lease = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|e| HarvestError::FatalSession(format!("Failed to lease a browser: {}", e)))?;

        if !frontier.seed(prepared.start.as_str(), &prepared.policy) {
            tracing::warn!("Start URL {} is excluded by the session policy", prepared.start);
        }

        loop {
            let (status, pages_processed) = self
                .inner
                .sessions
                .read(session_id, |s| (s.status, s.pages_processed))
                .unwrap_or((SessionStatus::Stopped, 0));

            if status != SessionStatus::Running {
                tracing::info!("Session is {}, leaving crawl loop", status);
                break;
            }

            if pages_processed >= prepared.session.max_pages {
                tracing::info!("Reached page limit of {}", prepared.session.max_pages);
                break;
            }

            let Some(entry) = frontier.next_link() else {
                tracing::info!("No more links to process");
                break;
            };

            match self.process_page(prepared, &lease, &entry, frontier).await {
                Ok(()) => {
                    let processed = self
                        .inner
                        .sessions
                        .update(session_id, |s| {
                            s.pages_processed += 1;
                            s.pages_processed
                        })
                        .unwrap_or_default();
                    tracing::info!(
                        "Processed {}/{} pages, {} queued",
                        processed,
                        prepared.session.max_pages,
                        frontier.queue_size()
                    );
                }
                Err(e) => {
                    tracing::warn!(url = %entry.url, "Page failed: {}", e);
                    self.record_error(session_id, format!("Failed to process {}: {}", entry.url, e));
                }
            }

            frontier.mark_as_processed(&entry.url);
        }

        Ok(())
    }

    async fn process_page(
        &self,
        prepared: &PreparedSession,
        lease: &BrowserLease,
        entry: &FrontierEntry,
        frontier: &mut Frontier,
    ) -> Result<()> {
        let session_id = prepared.session.id.as_str();
        tracing::debug!(url = %entry.url, depth = entry.depth, "Processing page");

        let url = Url::parse(&entry.url)?;
        let page = lease
            .browser()
            .navigate(&url, &self.inner.navigation)
            .await
            .map_err(|e| navigation_error(&entry.url, e))?;

        let extracted = page.extract().await.map_err(|e| HarvestError::Extraction {
            url: entry.url.clone(),
            message: e.to_string(),
        })?;

        let crawled_at = Utc::now();
        let record = PageRecord {
            url: &entry.url,
            title: extracted.title.as_deref(),
            content: &extracted.content,
            metadata: PageMetadata {
                depth: entry.depth,
                parent_url: entry.parent_url.as_deref(),
                final_url: page.url().as_str(),
                crawled_at,
                content_type: page.content_type(),
                status_code: page.status_code(),
                links_found: extracted.links.len(),
            },
        };

        let metadata = HashMap::from([
            ("session-id".to_string(), session_id.to_string()),
            ("url".to_string(), entry.url.clone()),
            ("crawled-at".to_string(), crawled_at.to_rfc3339()),
        ]);

        self.inner
            .objects
            .put(
                &self.inner.bucket,
                &page_record_key(&entry.url, session_id, crawled_at),
                serde_json::to_vec_pretty(&record)?,
                "application/json",
                &metadata,
            )
            .await?;

        if prepared.session.take_screenshots {
            self.store_capture(page.as_ref(), &entry.url, session_id, crawled_at, &metadata)
                .await;
        }

        if let Some(options) = prepared.session.active_media() {
            self.process_media(session_id, lease, &url, options).await;
        }

        frontier.add_links(&extracted.links, &entry.url, entry.depth, &prepared.policy);
        Ok(())
    }

    /// Stores a page capture; failures are logged and never fail the page
    async fn store_capture(
        &self,
        page: &dyn Page,
        url: &str,
        session_id: &str,
        at: DateTime<Utc>,
        metadata: &HashMap<String, String>,
    ) {
        let capture = match page.capture().await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!(url, "Capture failed: {}", e);
                return;
            }
        };

        let key = screenshot_key(url, session_id, &capture.extension, at);
        if let Err(e) = self
            .inner
            .objects
            .put(
                &self.inner.bucket,
                &key,
                capture.bytes,
                &capture.content_type,
                metadata,
            )
            .await
        {
            tracing::warn!(url, "Failed to store capture: {}", e);
        }
    }

    /// Detects, downloads and catalogs a page's media
    ///
    /// Detection runs on an auxiliary page opened on the session's browser.
    /// Failures land in `session.errors` and never fail the page.
    async fn process_media(
        &self,
        session_id: &str,
        lease: &BrowserLease,
        url: &Url,
        options: &MediaOptions,
    ) {
        if options.media_types.is_empty() {
            return;
        }

        let page = match lease.open_page(url, &self.inner.navigation).await {
            Ok(page) => page,
            Err(e) => {
                self.record_error(session_id, format!("Media processing failed for {}: {}", url, e));
                return;
            }
        };

        let files = media::detect(page.as_ref(), url.as_str(), &options.media_types).await;
        if files.is_empty() {
            return;
        }
        tracing::info!(url = %url, "Detected {} media files", files.len());

        let results = self
            .inner
            .downloader
            .download(&files, session_id, &options.download_options())
            .await;

        let (stored, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.success);

        if !stored.is_empty() {
            let files: Vec<_> = stored.into_iter().map(|r| r.file).collect();
            let total = self.inner.catalog.save(session_id, &files);
            tracing::debug!("Stored {} media files, session holds {}", files.len(), total);
        }

        if !failed.is_empty() {
            tracing::warn!("{} media downloads failed", failed.len());
            for result in failed {
                let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
                self.record_error(
                    session_id,
                    format!("Media download failed for {}: {}", result.file.url, reason),
                );
            }
        }
    }

    /// Writes the session summary document and record
    ///
    /// Failures are logged only; the session's outcome is already decided.
    async fn persist_summary(&self, session: &CrawlSession, frontier: &Frontier) {
        let frontier_stats = frontier.stats();
        let document = serde_json::json!({
            "session": session,
            "frontier": frontier_stats,
            "summary": {
                "pagesProcessed": session.pages_processed,
                "linksDiscovered": frontier_stats.discovered,
                "linksProcessed": frontier_stats.processed,
                "errorCount": session.errors.len(),
                "durationMs": session.duration().num_milliseconds(),
            },
        });

        let key = session_metadata_key(&session.id, session.start_time);
        let metadata = HashMap::from([
            ("session-id".to_string(), session.id.clone()),
            ("status".to_string(), session.status.to_db_string().to_string()),
        ]);

        match serde_json::to_vec_pretty(&document) {
            Ok(bytes) => {
                if let Err(e) = self
                    .inner
                    .objects
                    .put(&self.inner.bucket, &key, bytes, "application/json", &metadata)
                    .await
                {
                    tracing::error!("Failed to store session metadata: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize session metadata: {}", e),
        }

        let record = SessionRecord {
            id: session.id.clone(),
            start_url: session.start_url.clone(),
            status: session.status,
            started_at: session.start_time,
            ended_at: session.end_time,
            pages_processed: session.pages_processed,
            error_count: session.errors.len(),
            document,
        };
        if let Err(e) = storage::lock(&self.inner.metadata).save_session(&record) {
            tracing::error!("Failed to record session: {}", e);
        }

        if let Err(e) = self.inner.catalog.save_metadata(&session.id).await {
            tracing::error!("Failed to store media metadata: {}", e);
        }
    }

    fn record_error(&self, session_id: &str, message: String) {
        self.inner
            .sessions
            .update(session_id, |s| s.errors.push(message));
    }
}

/// Validates a request and builds its session
fn prepare(session_id: String, request: &CrawlRequest) -> Result<PreparedSession> {
    let start = parse_start_url(&request.start_url)
        .map_err(|e| HarvestError::InvalidInput(format!("{}: {}", request.start_url, e)))?;

    if request.settings.max_pages == 0 {
        return Err(HarvestError::InvalidInput(
            "maxPages must be at least 1".to_string(),
        ));
    }

    let policy = request
        .settings
        .link_policy(&start)
        .map_err(|e| HarvestError::InvalidInput(e.to_string()))?;

    Ok(PreparedSession {
        session: CrawlSession::new(session_id, &start, &request.settings),
        start,
        policy,
    })
}

fn navigation_error(url: &str, error: BrowserError) -> HarvestError {
    match error {
        BrowserError::Navigation { url, message } => HarvestError::Navigation { url, message },
        other => HarvestError::Navigation {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}
