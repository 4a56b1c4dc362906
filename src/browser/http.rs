//! HTTP page engine
//!
//! A browser stand-in built on reqwest: every "browser" is its own client
//! (and connection pool), navigation is a GET, and extraction runs the
//! scraper-based parser over the fetched document.

use super::parser::{extract_media_elements, parse_page};
use super::{
    Browser, BrowserError, BrowserLauncher, ExtractedPage, LaunchedBrowser, MediaElement,
    NavigateOptions, Page, PageCapture,
};
use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Formats the crawler's user agent
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use harvester::browser::build_http_client;
/// use harvester::config::UserAgentConfig;
///
/// let config = UserAgentConfig {
///     crawler_name: "Harvester".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Launches [`HttpBrowser`] instances
pub struct HttpLauncher {
    user_agent: UserAgentConfig,
}

impl HttpLauncher {
    pub fn new(user_agent: UserAgentConfig) -> Self {
        Self { user_agent }
    }
}

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn launch(&self) -> Result<LaunchedBrowser, BrowserError> {
        let client = build_http_client(&self.user_agent)
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let (tx, rx) = oneshot::channel();

        Ok(LaunchedBrowser {
            browser: Arc::new(HttpBrowser {
                client,
                disconnect: Mutex::new(Some(tx)),
            }),
            disconnected: rx,
        })
    }
}

/// One HTTP "browser": a client plus its disconnect signal
pub struct HttpBrowser {
    client: Client,
    disconnect: Mutex<Option<oneshot::Sender<()>>>,
}

impl HttpBrowser {
    fn is_closed(&self) -> bool {
        self.disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn navigate(
        &self,
        url: &Url,
        options: &NavigateOptions,
    ) -> Result<Box<dyn Page>, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::Closed);
        }

        let navigation_error = |message: String| BrowserError::Navigation {
            url: url.to_string(),
            message,
        };

        let fetch = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| navigation_error(e.to_string()))?;

            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                return Err(navigation_error(format!("HTTP {}", status.as_u16())));
            }

            let final_url = response.url().clone();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response
                .text()
                .await
                .map_err(|e| navigation_error(e.to_string()))?;

            Ok::<_, BrowserError>(HttpPage {
                url: final_url,
                status_code: status.as_u16(),
                content_type,
                body,
            })
        };

        let page = tokio::time::timeout(options.timeout, fetch)
            .await
            .map_err(|_| BrowserError::Timeout {
                url: url.to_string(),
                timeout: options.timeout,
            })??;

        Ok(Box::new(page))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let sender = self
            .disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => Err(BrowserError::Closed),
        }
    }
}

/// A page fetched by [`HttpBrowser`]
pub struct HttpPage {
    url: Url,
    status_code: u16,
    content_type: Option<String>,
    body: String,
}

impl HttpPage {
    fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(true, |ct| ct.contains("text/html") || ct.contains("xhtml"))
    }
}

#[async_trait]
impl Page for HttpPage {
    fn url(&self) -> &Url {
        &self.url
    }

    fn status_code(&self) -> Option<u16> {
        Some(self.status_code)
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn extract(&self) -> Result<ExtractedPage, BrowserError> {
        if !self.is_html() {
            return Err(BrowserError::Extraction(format!(
                "Unsupported content type: {}",
                self.content_type.as_deref().unwrap_or_default()
            )));
        }
        Ok(parse_page(&self.body, &self.url))
    }

    async fn media_elements(&self) -> Result<Vec<MediaElement>, BrowserError> {
        if !self.is_html() {
            return Ok(Vec::new());
        }
        Ok(extract_media_elements(&self.body))
    }

    /// The HTTP engine does not render; the capture is the fetched document
    async fn capture(&self) -> Result<PageCapture, BrowserError> {
        Ok(PageCapture {
            bytes: self.body.as_bytes().to_vec(),
            content_type: self
                .content_type
                .clone()
                .unwrap_or_else(|| "text/html".to_string()),
            extension: "html".to_string(),
        })
    }
}
