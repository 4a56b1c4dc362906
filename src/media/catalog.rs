//! Per-session media catalog
//!
//! Holds the media descriptors collected by each session, answers queries
//! over them and persists a metadata document per session.

use super::types::{MediaFileDescriptor, MediaType};
use crate::storage::paths::media_metadata_key;
use crate::storage::{ObjectStore, StorageResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Lifetime of a presigned download URL
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Filter for [`MediaCatalog::search`]; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaQuery {
    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,

    /// Exact, case-insensitive
    pub extension: Option<String>,

    /// Substring, case-insensitive
    pub file_name: Option<String>,

    /// Substring, case-insensitive
    pub source_url: Option<String>,

    /// Only applied to files with a known size
    pub min_size: Option<u64>,

    /// Only applied to files with a known size
    pub max_size: Option<u64>,
}

impl MediaQuery {
    fn matches(&self, file: &MediaFileDescriptor) -> bool {
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };

        self.media_type.map_or(true, |t| file.media_type == t)
            && self
                .extension
                .as_ref()
                .map_or(true, |e| file.extension.eq_ignore_ascii_case(e))
            && self
                .file_name
                .as_ref()
                .map_or(true, |n| contains(&file.file_name, n))
            && self
                .source_url
                .as_ref()
                .map_or(true, |s| contains(&file.source_url, s))
            && match (self.min_size, file.size) {
                (Some(min), Some(size)) => size >= min,
                _ => true,
            }
            && match (self.max_size, file.size) {
                (Some(max), Some(size)) => size <= max,
                _ => true,
            }
    }
}

/// Aggregate counts across every session in the catalog
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStats {
    pub total_sessions: usize,
    pub total_files: usize,
    pub files_by_type: BTreeMap<MediaType, usize>,
    pub files_by_session: BTreeMap<String, usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaMetadataDocument<'a> {
    session_id: &'a str,
    total_files: usize,
    files_by_type: BTreeMap<MediaType, usize>,
    files: &'a [MediaFileDescriptor],
    created_at: chrono::DateTime<Utc>,
}

/// Media collections keyed by session id
pub struct MediaCatalog {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    files: RwLock<HashMap<String, Vec<MediaFileDescriptor>>>,
}

impl MediaCatalog {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Adds files to a session's collection
    ///
    /// A file equal in `(url, source_url)` to one already collected is
    /// dropped; the first occurrence wins.
    ///
    /// # Returns
    ///
    /// The size of the session's collection afterwards
    pub fn save(&self, session_id: &str, files: &[MediaFileDescriptor]) -> usize {
        let mut all = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let collection = all.entry(session_id.to_string()).or_default();

        let mut seen: HashSet<(String, String)> = collection
            .iter()
            .map(|f| (f.url.clone(), f.source_url.clone()))
            .collect();

        for file in files {
            if seen.insert((file.url.clone(), file.source_url.clone())) {
                collection.push(file.clone());
            }
        }

        tracing::debug!(
            session_id,
            "Saved {} media files, session now holds {}",
            files.len(),
            collection.len()
        );
        collection.len()
    }

    /// Returns a session's collection
    pub fn files(&self, session_id: &str) -> Vec<MediaFileDescriptor> {
        self.search(session_id, &MediaQuery::default())
    }

    pub fn by_type(&self, session_id: &str, media_type: MediaType) -> Vec<MediaFileDescriptor> {
        self.search(
            session_id,
            &MediaQuery {
                media_type: Some(media_type),
                ..MediaQuery::default()
            },
        )
    }

    pub fn by_extension(&self, session_id: &str, extension: &str) -> Vec<MediaFileDescriptor> {
        self.search(
            session_id,
            &MediaQuery {
                extension: Some(extension.trim_start_matches('.').to_string()),
                ..MediaQuery::default()
            },
        )
    }

    /// Returns a session's files matching every set field of `query`
    pub fn search(&self, session_id: &str, query: &MediaQuery) -> Vec<MediaFileDescriptor> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|files| files.iter().filter(|f| query.matches(f)).cloned().collect())
            .unwrap_or_default()
    }

    /// Aggregate counts across sessions
    pub fn stats(&self) -> MediaStats {
        let all = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = MediaStats {
            total_sessions: all.len(),
            ..MediaStats::default()
        };

        for (session_id, files) in all.iter() {
            stats.total_files += files.len();
            stats.files_by_session.insert(session_id.clone(), files.len());
            for file in files {
                *stats.files_by_type.entry(file.media_type).or_default() += 1;
            }
        }

        stats
    }

    /// Presigned URL for a downloaded file, found by file name
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the session has no stored file with that name
    pub async fn download_url(
        &self,
        session_id: &str,
        file_name: &str,
    ) -> StorageResult<Option<String>> {
        let storage_path = self
            .files(session_id)
            .into_iter()
            .find(|f| f.file_name == file_name && f.is_downloaded())
            .and_then(|f| f.storage_path);

        match storage_path {
            Some(path) => Ok(Some(
                self.store
                    .presigned_get(&self.bucket, &path, DOWNLOAD_URL_TTL)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Writes `sessions/<id>/media-metadata.json`
    ///
    /// # Returns
    ///
    /// The object key, or `None` when the session collected no media
    pub async fn save_metadata(&self, session_id: &str) -> StorageResult<Option<String>> {
        let files = self.files(session_id);
        if files.is_empty() {
            return Ok(None);
        }

        let mut files_by_type = BTreeMap::new();
        for file in &files {
            *files_by_type.entry(file.media_type).or_insert(0usize) += 1;
        }

        let now = Utc::now();
        let document = MediaMetadataDocument {
            session_id,
            total_files: files.len(),
            files_by_type,
            files: &files,
            created_at: now,
        };

        let key = media_metadata_key(session_id);
        let metadata = HashMap::from([
            ("session-id".to_string(), session_id.to_string()),
            ("total-files".to_string(), files.len().to_string()),
            ("created-at".to_string(), now.to_rfc3339()),
        ]);

        self.store
            .put(
                &self.bucket,
                &key,
                serde_json::to_vec_pretty(&document)?,
                "application/json",
                &metadata,
            )
            .await?;

        tracing::info!(session_id, "Media metadata saved to {}", key);
        Ok(Some(key))
    }

    /// Drops a session's collection
    pub fn cleanup_session(&self, session_id: &str) -> bool {
        let removed = self
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();

        if removed {
            tracing::debug!(session_id, "Media collection removed");
        }
        removed
    }
}
