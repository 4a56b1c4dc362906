//! Browser module: the page-automation collaborator and its pool
//!
//! This module defines the traits the crawl orchestrator drives:
//! - `BrowserLauncher` starts a browser instance plus its disconnect signal
//! - `Browser` navigates to a URL and hands back a `Page`
//! - `Page` exposes extraction, media enumeration and a visual capture
//!
//! `BrowserPool` leases a bounded set of launched browsers. `HttpBrowser`
//! is the default engine: a reqwest client with scraper-based extraction.

mod http;
mod parser;
mod pool;

pub use http::{build_http_client, user_agent_string, HttpBrowser, HttpLauncher, HttpPage};
pub use parser::{extract_media_elements, parse_page};
pub use pool::{BrowserLease, BrowserPool, PoolConfig, PoolError, PoolStats};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

/// Errors raised by a browser engine
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Browser is closed")]
    Closed,
}

/// Options for a single navigation
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    /// Per-page navigation timeout
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Content extracted from a loaded page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,

    /// Visible body text, whitespace collapsed
    pub content: String,

    /// Absolute http(s) links
    pub links: Vec<String>,

    /// Absolute image URLs
    pub images: Vec<String>,
}

/// Kind of media-bearing element found on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaElementKind {
    Image,
    Video,
    Audio,
    /// `<source>` inside a video or audio element
    Source,
    /// Outbound `<a href>`
    Link,
}

/// A media-bearing element with its raw, unresolved URL attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaElement {
    pub kind: MediaElementKind,
    pub src: String,
}

/// A visual capture of a page
#[derive(Debug, Clone)]
pub struct PageCapture {
    pub bytes: Vec<u8>,
    pub content_type: String,

    /// File extension used when the capture is stored
    pub extension: String,
}

/// A loaded page
#[async_trait]
pub trait Page: Send + Sync {
    /// Final URL after redirects
    fn url(&self) -> &Url;

    fn status_code(&self) -> Option<u16>;

    fn content_type(&self) -> Option<&str>;

    /// Extracts title, text, links and images
    async fn extract(&self) -> Result<ExtractedPage, BrowserError>;

    /// Enumerates media-bearing elements
    async fn media_elements(&self) -> Result<Vec<MediaElement>, BrowserError>;

    /// Captures the page as the engine renders it
    async fn capture(&self) -> Result<PageCapture, BrowserError>;
}

/// A browser instance that can load pages
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(
        &self,
        url: &Url,
        options: &NavigateOptions,
    ) -> Result<Box<dyn Page>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// A freshly launched browser and its out-of-band disconnect signal
///
/// The signal fires (or its sender is dropped) when the instance goes away.
pub struct LaunchedBrowser {
    pub browser: Arc<dyn Browser>,
    pub disconnected: oneshot::Receiver<()>,
}

/// Starts browser instances for the pool
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<LaunchedBrowser, BrowserError>;
}
