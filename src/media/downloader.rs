//! Media downloader
//!
//! Downloads detected media in sequential batches of concurrent transfers.
//! Each transfer is gated by a HEAD size probe, capped while streaming,
//! hashed, and deduplicated by content before it is uploaded.

use super::types::{
    DownloadFailure, DownloadOptions, DownloadResult, MediaFileDescriptor,
};
use crate::storage::paths::{content_hash, media_key, session_media_prefix};
use crate::storage::{ObjectStore, StorageError};
use chrono::Utc;
use futures::future::join_all;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Errors for a single file download
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Already downloading: {0}")]
    InProgress(String),
}

impl DownloadError {
    pub fn failure(&self) -> DownloadFailure {
        match self {
            Self::FileTooLarge { .. } => DownloadFailure::FileTooLarge,
            Self::Network(_) => DownloadFailure::Network,
            Self::Timeout(_) => DownloadFailure::Timeout,
            Self::HttpStatus { .. } => DownloadFailure::HttpStatus,
            Self::Storage(_) => DownloadFailure::Storage,
            Self::InProgress(_) => DownloadFailure::InProgress,
        }
    }

    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Downloader counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloaderStats {
    pub active_downloads: usize,
    /// Distinct contents stored by this process
    pub total_stored: usize,
}

type StoredCell = Arc<OnceCell<MediaFileDescriptor>>;

/// Downloads media files into object storage
pub struct MediaDownloader {
    client: Client,
    store: Arc<dyn ObjectStore>,
    bucket: String,

    /// `url|session` keys of transfers in flight
    active: Mutex<HashSet<String>>,

    /// Content hash to the first stored descriptor with that content
    by_hash: Mutex<HashMap<String, StoredCell>>,
}

impl MediaDownloader {
    pub fn new(client: Client, store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            store,
            bucket: bucket.into(),
            active: Mutex::new(HashSet::new()),
            by_hash: Mutex::new(HashMap::new()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Downloads files for a session
    ///
    /// Input is de-duplicated by URL (first occurrence wins), then split
    /// into batches of `options.concurrent`. Batches run one after another;
    /// files within a batch run concurrently. A failed file never stops the
    /// batch.
    ///
    /// # Returns
    ///
    /// One result per unique input URL, in input order
    pub async fn download(
        &self,
        files: &[MediaFileDescriptor],
        session_id: &str,
        options: &DownloadOptions,
    ) -> Vec<DownloadResult> {
        let mut seen = HashSet::new();
        let unique: Vec<&MediaFileDescriptor> = files
            .iter()
            .filter(|file| seen.insert(file.url.as_str()))
            .collect();

        tracing::info!(
            session_id,
            "Downloading {} media files ({} unique)",
            files.len(),
            unique.len()
        );

        let mut results = Vec::with_capacity(unique.len());
        for batch in unique.chunks(options.concurrent.max(1)) {
            let batch_results = join_all(
                batch
                    .iter()
                    .map(|file| self.download_one(file, session_id, options)),
            )
            .await;
            results.extend(batch_results);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::info!(
            session_id,
            "Media download finished: {}/{} succeeded",
            succeeded,
            results.len()
        );

        results
    }

    async fn download_one(
        &self,
        file: &MediaFileDescriptor,
        session_id: &str,
        options: &DownloadOptions,
    ) -> DownloadResult {
        let key = format!("{}|{}", file.url, session_id);
        if !lock(&self.active).insert(key.clone()) {
            return failed(file, DownloadError::InProgress(file.url.clone()));
        }

        let outcome = self.transfer_and_store(file, session_id, options).await;
        lock(&self.active).remove(&key);

        match outcome {
            Ok((stored, deduplicated)) => DownloadResult {
                success: true,
                file: stored,
                error: None,
                failure: None,
                deduplicated,
            },
            Err(e) => {
                tracing::warn!(session_id, url = %file.url, "Media download failed: {}", e);
                failed(file, e)
            }
        }
    }

    async fn transfer_and_store(
        &self,
        file: &MediaFileDescriptor,
        session_id: &str,
        options: &DownloadOptions,
    ) -> Result<(MediaFileDescriptor, bool), DownloadError> {
        let limit = options.max_file_size_bytes();

        self.probe_size(&file.url, limit, options.download_timeout / 2)
            .await?;

        let (bytes, content_type) = tokio::time::timeout(
            options.download_timeout,
            self.fetch_capped(&file.url, limit, options.download_timeout),
        )
        .await
        .map_err(|_| DownloadError::Timeout(options.download_timeout))??;

        let hash = content_hash(&bytes);
        let cell = lock(&self.by_hash).entry(hash.clone()).or_default().clone();

        let mut uploaded = false;
        let stored = cell
            .get_or_try_init(|| async {
                uploaded = true;
                self.upload(file, session_id, &hash, bytes, &content_type)
                    .await
            })
            .await?;

        if !uploaded {
            tracing::debug!(
                session_id,
                "Content of {} already stored at {:?}",
                file.url,
                stored.storage_path
            );
        }

        let descriptor = MediaFileDescriptor {
            size: stored.size,
            storage_path: stored.storage_path.clone(),
            content_hash: Some(hash),
            downloaded_at: Some(Utc::now()),
            ..file.clone()
        };

        Ok((descriptor, !uploaded))
    }

    /// HEAD probe; fails without transferring the body if the declared size
    /// exceeds `limit`
    async fn probe_size(&self, url: &str, limit: u64, timeout: Duration) -> Result<(), DownloadError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(e, timeout))?;

        check_status(url, &response)?;

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        match declared {
            Some(size) if size > limit => Err(DownloadError::FileTooLarge { size, limit }),
            _ => Ok(()),
        }
    }

    /// GET with a hard size cap enforced while streaming
    async fn fetch_capped(
        &self,
        url: &str,
        limit: u64,
        timeout: Duration,
    ) -> Result<(Vec<u8>, String), DownloadError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(e, timeout))?;

        check_status(url, &response)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::from_reqwest(e, timeout))?
        {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > limit {
                return Err(DownloadError::FileTooLarge { size, limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }

    async fn upload(
        &self,
        file: &MediaFileDescriptor,
        session_id: &str,
        hash: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<MediaFileDescriptor, DownloadError> {
        let now = Utc::now();
        let storage_path = media_key(session_id, file.media_type, hash, &file.file_name, now);
        let size = bytes.len() as u64;

        let metadata = HashMap::from([
            ("original-url".to_string(), file.url.clone()),
            ("source-url".to_string(), file.source_url.clone()),
            ("media-type".to_string(), file.media_type.to_string()),
            ("file-extension".to_string(), file.extension.clone()),
            ("session-id".to_string(), session_id.to_string()),
            ("downloaded-at".to_string(), now.to_rfc3339()),
            ("hash".to_string(), hash.to_string()),
        ]);

        self.store
            .put(&self.bucket, &storage_path, bytes, content_type, &metadata)
            .await?;

        tracing::debug!(session_id, "Stored {} -> {}", file.url, storage_path);

        Ok(MediaFileDescriptor {
            size: Some(size),
            storage_path: Some(storage_path),
            content_hash: Some(hash.to_string()),
            downloaded_at: Some(now),
            ..file.clone()
        })
    }

    /// Returns downloader counters
    pub fn stats(&self) -> DownloaderStats {
        DownloaderStats {
            active_downloads: lock(&self.active).len(),
            total_stored: lock(&self.by_hash)
                .values()
                .filter(|cell| cell.initialized())
                .count(),
        }
    }

    /// Forgets stored contents that live under a session's media prefix
    ///
    /// # Returns
    ///
    /// The number of entries dropped from the content-hash index
    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let prefix = session_media_prefix(session_id);
        let mut by_hash = lock(&self.by_hash);
        let before = by_hash.len();

        by_hash.retain(|_, cell| {
            cell.get()
                .and_then(|stored| stored.storage_path.as_deref())
                .map_or(true, |path| !path.starts_with(&prefix))
        });

        let removed = before - by_hash.len();
        tracing::debug!(session_id, "Dropped {} stored media entries", removed);
        removed
    }
}

fn check_status(url: &str, response: &Response) -> Result<(), DownloadError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

fn failed(file: &MediaFileDescriptor, error: DownloadError) -> DownloadResult {
    DownloadResult {
        success: false,
        file: file.clone(),
        failure: Some(error.failure()),
        error: Some(error.to_string()),
        deduplicated: false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;
    use crate::storage::MemoryObjectStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(url: String, name: &str) -> MediaFileDescriptor {
        MediaFileDescriptor {
            url,
            media_type: MediaType::Image,
            extension: "png".to_string(),
            file_name: name.to_string(),
            source_url: "https://example.com/".to_string(),
            size: None,
            storage_path: None,
            content_hash: None,
            downloaded_at: None,
        }
    }

    async fn serve(server: &MockServer, route: &str, body: &[u8]) {
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(body.to_vec()),
            )
            .mount(server)
            .await;
    }

    fn downloader(store: Arc<MemoryObjectStore>) -> MediaDownloader {
        MediaDownloader::new(Client::new(), store, "media")
    }

    #[tokio::test]
    async fn test_content_dedup_across_urls() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"same-bytes").await;
        serve(&server, "/b.png", b"same-bytes").await;

        let store = Arc::new(MemoryObjectStore::new());
        let downloader = downloader(store.clone());
        let files = vec![
            descriptor(format!("{}/a.png", server.uri()), "a.png"),
            descriptor(format!("{}/b.png", server.uri()), "b.png"),
        ];

        let results = downloader
            .download(&files, "s1", &DownloadOptions::default())
            .await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.put_count(), 1);
        assert_eq!(results[0].file.storage_path, results[1].file.storage_path);
        assert_eq!(results[0].file.url, files[0].url);
        assert_eq!(results[1].file.url, files[1].url);
        assert_eq!(results.iter().filter(|r| r.deduplicated).count(), 1);
        assert_eq!(downloader.stats().total_stored, 1);
    }

    #[tokio::test]
    async fn test_duplicate_urls_download_once() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"bytes").await;

        let store = Arc::new(MemoryObjectStore::new());
        let url = format!("{}/a.png", server.uri());
        let files = vec![descriptor(url.clone(), "a.png"), descriptor(url, "a.png")];

        let results = downloader(store.clone())
            .download(&files, "s1", &DownloadOptions::default())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_streaming_cap_without_declared_size() {
        let server = MockServer::start().await;
        serve(&server, "/big.png", &vec![7u8; 2 * 1024 * 1024]).await;

        let store = Arc::new(MemoryObjectStore::new());
        let options = DownloadOptions {
            max_file_size_mb: 1,
            ..DownloadOptions::default()
        };

        let results = downloader(store.clone())
            .download(
                &[descriptor(format!("{}/big.png", server.uri()), "big.png")],
                "s1",
                &options,
            )
            .await;

        assert!(!results[0].success);
        assert_eq!(results[0].failure, Some(DownloadFailure::FileTooLarge));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_http_error_is_per_file() {
        let server = MockServer::start().await;
        serve(&server, "/ok.png", b"fine").await;
        Mock::given(method("HEAD"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryObjectStore::new());
        let files = vec![
            descriptor(format!("{}/gone.png", server.uri()), "gone.png"),
            descriptor(format!("{}/ok.png", server.uri()), "ok.png"),
        ];

        let results = downloader(store)
            .download(&files, "s1", &DownloadOptions::default())
            .await;

        assert!(!results[0].success);
        assert_eq!(results[0].failure, Some(DownloadFailure::HttpStatus));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_storage_metadata_and_cleanup() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", b"pixels").await;

        let store = Arc::new(MemoryObjectStore::new());
        let downloader = downloader(store.clone());
        let results = downloader
            .download(
                &[descriptor(format!("{}/a.png", server.uri()), "a.png")],
                "s1",
                &DownloadOptions::default(),
            )
            .await;

        let path = results[0].file.storage_path.clone().unwrap();
        assert!(path.starts_with("sessions/s1/media/image/"));
        assert!(path.ends_with("_a.png"));

        let object = store.object("media", &path).unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.metadata["session-id"], "s1");
        assert_eq!(object.metadata["hash"], results[0].file.content_hash.clone().unwrap());

        assert_eq!(downloader.cleanup_session("other"), 0);
        assert_eq!(downloader.cleanup_session("s1"), 1);
        assert_eq!(downloader.stats().total_stored, 0);
    }
}
