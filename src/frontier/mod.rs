//! URL frontier for a single crawl session
//!
//! The frontier holds every link discovered during a session together with
//! the dedup indices that guarantee no URL is queued twice:
//! - `discovered` maps each accepted URL to its entry
//! - `processed` holds URLs the session has finished with
//! - `queue` holds discovered entries not yet handed out
//!
//! Invariants: a URL, once discovered, is never re-enqueued, and every
//! processed URL is also a discovered URL. None of the operations fail;
//! rejected input is only reflected in the returned counts.

use crate::url::LinkPolicy;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Depth assigned to the session's start URL
pub const ROOT_DEPTH: u32 = 0;

/// A link accepted into the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierEntry {
    /// The link as discovered
    pub url: String,

    /// Distance from the start URL (root is 0)
    pub depth: u32,

    /// The page the link was found on (None for the root)
    pub parent_url: Option<String>,

    /// Always true once the entry exists
    pub discovered: bool,

    /// Set once, when the session is done with the link
    pub processed: bool,
}

/// Snapshot of frontier counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierStats {
    pub processed: usize,
    pub discovered: usize,
    pub queued: usize,
    pub processed_urls: Vec<String>,
}

/// In-memory queue and dedup index of discovered links
#[derive(Debug, Default)]
pub struct Frontier {
    discovered: HashMap<String, FrontierEntry>,
    processed: HashSet<String>,
    queue: Vec<FrontierEntry>,
}

impl Frontier {
    /// Creates an empty frontier
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the session's start URL at [`ROOT_DEPTH`]
    ///
    /// The root passes through the same policy as any other link, so an
    /// excluded or foreign start URL yields an empty frontier.
    ///
    /// # Returns
    ///
    /// `true` if the root was accepted
    pub fn seed(&mut self, url: &str, policy: &LinkPolicy) -> bool {
        self.insert_checked(url, None, ROOT_DEPTH, policy)
    }

    /// Adds links found on a page at `current_depth`
    ///
    /// Every accepted link lands at `current_depth + 1`. A link is refused if
    /// that depth exceeds the policy's maximum, if it was already discovered
    /// or processed, or if the policy rejects it (scheme, domain, exclude
    /// pattern, extension, malformed URL).
    ///
    /// # Arguments
    ///
    /// * `links` - Candidate links, absolute URLs
    /// * `parent_url` - The page the links were found on
    /// * `current_depth` - Depth of the parent page
    /// * `policy` - The session's traversal rules
    ///
    /// # Returns
    ///
    /// The number of links added to the queue
    pub fn add_links(
        &mut self,
        links: &[String],
        parent_url: &str,
        current_depth: u32,
        policy: &LinkPolicy,
    ) -> usize {
        let depth = current_depth.saturating_add(1);
        let added = links
            .iter()
            .filter(|link| self.insert_checked(link, Some(parent_url), depth, policy))
            .count();

        tracing::debug!(
            "Added {} of {} links from {} at depth {}",
            added,
            links.len(),
            parent_url,
            depth
        );

        added
    }

    fn insert_checked(
        &mut self,
        link: &str,
        parent_url: Option<&str>,
        depth: u32,
        policy: &LinkPolicy,
    ) -> bool {
        if self.discovered.contains_key(link) || self.processed.contains(link) {
            tracing::trace!("Skipping already seen link: {}", link);
            return false;
        }

        if let Err(reason) = policy.check(link, depth) {
            tracing::trace!("Skipping link {} ({:?})", link, reason);
            return false;
        }

        let entry = FrontierEntry {
            url: link.to_string(),
            depth,
            parent_url: parent_url.map(str::to_string),
            discovered: true,
            processed: false,
        };

        self.discovered.insert(entry.url.clone(), entry.clone());
        self.queue.push(entry);
        true
    }

    /// Takes the shallowest unprocessed entry off the queue
    ///
    /// The queue is stably re-sorted by depth before each pick, so entries of
    /// equal depth come out in insertion order.
    pub fn next_link(&mut self) -> Option<FrontierEntry> {
        self.queue.sort_by_key(|entry| entry.depth);

        let index = self
            .queue
            .iter()
            .position(|entry| !self.processed.contains(&entry.url))?;

        Some(self.queue.remove(index))
    }

    /// Marks a discovered URL as processed
    ///
    /// URLs the frontier never discovered are ignored.
    pub fn mark_as_processed(&mut self, url: &str) {
        match self.discovered.get_mut(url) {
            Some(entry) => {
                entry.processed = true;
                self.processed.insert(url.to_string());
                tracing::trace!("Marked as processed: {}", url);
            }
            None => {
                tracing::debug!("Ignoring processed mark for undiscovered URL: {}", url);
            }
        }
    }

    /// Returns true if the URL has been processed
    pub fn is_processed(&self, url: &str) -> bool {
        self.processed.contains(url)
    }

    /// Returns true if the URL has been discovered
    pub fn is_discovered(&self, url: &str) -> bool {
        self.discovered.contains_key(url)
    }

    /// Looks up the entry for a discovered URL
    pub fn entry(&self, url: &str) -> Option<&FrontierEntry> {
        self.discovered.get(url)
    }

    /// Number of queued entries not yet processed
    pub fn queue_size(&self) -> usize {
        self.queue
            .iter()
            .filter(|entry| !self.processed.contains(&entry.url))
            .count()
    }

    /// Number of processed URLs
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Number of discovered URLs
    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    /// Returns a snapshot of the frontier counters
    pub fn stats(&self) -> FrontierStats {
        let mut processed_urls: Vec<String> = self.processed.iter().cloned().collect();
        processed_urls.sort();

        FrontierStats {
            processed: self.processed_count(),
            discovered: self.discovered_count(),
            queued: self.queue_size(),
            processed_urls,
        }
    }

    /// Drops every entry and index
    pub fn clear(&mut self) {
        self.discovered.clear();
        self.processed.clear();
        self.queue.clear();
        tracing::debug!("Frontier cleared");
    }
}
