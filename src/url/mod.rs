//! URL handling module for Harvester
//!
//! This module provides domain matching, extension extraction and the
//! per-session link policy that decides which discovered links may enter
//! the frontier.

mod domain;
mod matcher;

use crate::UrlError;
use regex::{Regex, RegexBuilder};
use url::Url;

// Re-export main functions
pub use domain::{domain_or_unknown, extract_domain, path_extension, UNKNOWN_DOMAIN};
pub use matcher::{is_host_allowed, matches_allowed_domain};

/// Path extensions that are never followed as pages
///
/// Stylesheets, scripts, images, archives, office documents and media.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "pdf", "zip", "rar", "tar", "gz",
    "mp4", "mp3", "avi", "mov", "wmv", "flv", "swf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

/// Reason a link was refused by a [`LinkPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRejection {
    /// The link would land deeper than the maximum depth
    TooDeep,
    /// The link could not be parsed
    Malformed,
    /// The scheme is not http or https
    Scheme,
    /// The host is not covered by the allowed domains
    Domain,
    /// The link matched an exclude pattern
    Excluded,
    /// The path ends in a blacklisted extension
    Extension,
}

/// Traversal rules for one crawl session
///
/// Depth bookkeeping: the root URL sits at depth 0 and every child lands at
/// `parent_depth + 1`. A link is only accepted while its depth stays within
/// `max_depth`.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    /// Maximum depth of an accepted link (root is depth 0)
    pub max_depth: u32,

    /// Allowed domains; an empty list allows every host
    pub allowed_domains: Vec<String>,

    /// Compiled exclude patterns (case-insensitive)
    exclude_patterns: Vec<Regex>,

    /// Extensions refused as pages
    excluded_extensions: Vec<String>,
}

impl LinkPolicy {
    /// Builds a policy, compiling every exclude pattern case-insensitively
    ///
    /// # Arguments
    ///
    /// * `max_depth` - Maximum depth of an accepted link
    /// * `allowed_domains` - Domains (and their subdomains) that may be crawled
    /// * `exclude_patterns` - Regular expressions; matching URLs are skipped
    ///
    /// # Returns
    ///
    /// * `Ok(LinkPolicy)` - All patterns compiled
    /// * `Err(UrlError::InvalidPattern)` - A pattern is not a valid regex
    pub fn new(
        max_depth: u32,
        allowed_domains: Vec<String>,
        exclude_patterns: &[String],
    ) -> Result<Self, UrlError> {
        let exclude_patterns = exclude_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| UrlError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_depth,
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            exclude_patterns,
            excluded_extensions: EXCLUDED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        })
    }

    /// A policy with no domain, pattern or extension restriction
    pub fn unrestricted(max_depth: u32) -> Self {
        Self {
            max_depth,
            allowed_domains: Vec::new(),
            exclude_patterns: Vec::new(),
            excluded_extensions: Vec::new(),
        }
    }

    /// Replaces the extension blacklist
    pub fn with_excluded_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Checks a candidate link that would land at `depth`
    ///
    /// Checks run in order: depth, parse, scheme, domain, exclude pattern,
    /// extension. Dedup against already-seen URLs is the frontier's job.
    pub fn check(&self, link: &str, depth: u32) -> Result<Url, LinkRejection> {
        if depth > self.max_depth {
            return Err(LinkRejection::TooDeep);
        }

        let url = Url::parse(link).map_err(|_| LinkRejection::Malformed)?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(LinkRejection::Scheme);
        }

        let host = url.host_str().ok_or(LinkRejection::Malformed)?;
        if !is_host_allowed(&self.allowed_domains, host) {
            return Err(LinkRejection::Domain);
        }

        if self.exclude_patterns.iter().any(|re| re.is_match(link)) {
            return Err(LinkRejection::Excluded);
        }

        if let Some(ext) = path_extension(&url) {
            if self.excluded_extensions.iter().any(|e| *e == ext) {
                return Err(LinkRejection::Extension);
            }
        }

        Ok(url)
    }
}

/// Validates a crawl start URL
///
/// # Returns
///
/// * `Ok(Url)` - An absolute http(s) URL with a host
/// * `Err(UrlError)` - The URL is malformed or uses another scheme
pub fn parse_start_url(raw: &str) -> Result<Url, UrlError> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}
