//! Crawl session data and the registry that owns live sessions

use crate::media::MediaOptions;
use crate::state::SessionStatus;
use crate::url::{extract_domain, LinkPolicy};
use crate::UrlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_MAX_PAGES: u32 = 10;

/// Traversal and collection rules shared by every URL of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default)]
    pub take_screenshots: bool,

    /// `None` restricts the session to the start URL's host; an empty list
    /// allows every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_domains: Option<Vec<String>>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_options: Option<MediaOptions>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            take_screenshots: false,
            allowed_domains: None,
            exclude_patterns: Vec::new(),
            media_options: None,
        }
    }
}

impl CrawlSettings {
    /// Resolves the allow-list for a session starting at `start`
    pub fn allowed_domains_for(&self, start: &Url) -> Vec<String> {
        match &self.allowed_domains {
            Some(domains) => domains.clone(),
            None => extract_domain(start).into_iter().collect(),
        }
    }

    /// Compiles the link policy for a session starting at `start`
    pub fn link_policy(&self, start: &Url) -> Result<LinkPolicy, UrlError> {
        LinkPolicy::new(
            self.max_depth,
            self.allowed_domains_for(start),
            &self.exclude_patterns,
        )
    }
}

/// Request to start one crawl session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub start_url: String,

    #[serde(flatten)]
    pub settings: CrawlSettings,
}

impl CrawlRequest {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self::with_settings(start_url, CrawlSettings::default())
    }

    pub fn with_settings(start_url: impl Into<String>, settings: CrawlSettings) -> Self {
        Self {
            start_url: start_url.into(),
            settings,
        }
    }
}

/// State of one crawl session
///
/// Mutated only by the orchestrator loop that owns it; everyone else sees
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSession {
    pub id: String,
    pub start_url: String,
    pub max_depth: u32,
    pub max_pages: u32,
    pub allowed_domains: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub take_screenshots: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_options: Option<MediaOptions>,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    /// Pages fetched and stored successfully
    pub pages_processed: u32,

    /// Set to `pages_processed` when the session ends
    pub total_pages: u32,
    pub errors: Vec<String>,
}

impl CrawlSession {
    pub(crate) fn new(id: String, start: &Url, settings: &CrawlSettings) -> Self {
        Self {
            id,
            start_url: start.to_string(),
            max_depth: settings.max_depth,
            max_pages: settings.max_pages,
            allowed_domains: settings.allowed_domains_for(start),
            exclude_patterns: settings.exclude_patterns.clone(),
            take_screenshots: settings.take_screenshots,
            media_options: settings.media_options.clone(),
            status: SessionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            pages_processed: 0,
            total_pages: 0,
            errors: Vec::new(),
        }
    }

    /// Media options, if collection is switched on and has types to collect
    pub fn active_media(&self) -> Option<&MediaOptions> {
        self.media_options
            .as_ref()
            .filter(|m| m.enabled && !m.media_types.is_empty())
    }

    /// Wall time from start to end (or to now while running)
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Started,
    Failed,
}

/// Returned immediately by `Orchestrator::start_crawl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResponse {
    pub session_id: String,
    pub status: ResponseStatus,
    pub message: String,
}

impl CrawlResponse {
    pub(crate) fn started(session_id: String) -> Self {
        Self {
            message: format!("Crawl session {} started", session_id),
            session_id,
            status: ResponseStatus::Started,
        }
    }

    pub(crate) fn failed(session_id: String, message: String) -> Self {
        Self {
            session_id,
            status: ResponseStatus::Failed,
            message,
        }
    }

    pub fn is_started(&self) -> bool {
        self.status == ResponseStatus::Started
    }
}

/// Concurrency-safe map of sessions keyed by id
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, CrawlSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: CrawlSession) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    /// Snapshot of a session, `None` for unknown ids
    pub fn get(&self, session_id: &str) -> Option<CrawlSession> {
        self.read(session_id, Clone::clone)
    }

    /// Reads from a session without cloning it
    pub fn read<R>(&self, session_id: &str, f: impl FnOnce(&CrawlSession) -> R) -> Option<R> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(f)
    }

    /// Mutates a session in place
    pub fn update<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut CrawlSession) -> R,
    ) -> Option<R> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(session_id)
            .map(f)
    }

    pub fn remove(&self, session_id: &str) -> Option<CrawlSession> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Snapshots of every session still running, oldest first
    pub fn active(&self) -> Vec<CrawlSession> {
        let mut active: Vec<CrawlSession> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.status == SessionStatus::Running)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.start_time);
        active
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}
