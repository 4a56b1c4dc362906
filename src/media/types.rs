//! Media types, per-session media options and download descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Default number of concurrent downloads per batch
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 3;

/// Default per-file size ceiling in megabytes
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

/// Default per-file download timeout in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Category a media file is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
    Archive,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Archive => "archive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }

    pub fn all() -> [Self; 5] {
        [
            Self::Image,
            Self::Video,
            Self::Audio,
            Self::Document,
            Self::Archive,
        ]
    }

    /// Built-in extensions recognized for this type
    pub fn default_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "ico"],
            Self::Video => &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v"],
            Self::Audio => &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a"],
            Self::Document => &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"],
            Self::Archive => &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"],
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How custom extensions combine with the built-in set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionMode {
    /// Built-in extensions plus the custom ones
    #[default]
    Inherit,
    /// Only the custom extensions
    Override,
}

/// One media type a session collects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeConfig {
    #[serde(rename = "type")]
    pub media_type: MediaType,

    #[serde(default)]
    pub mode: ExtensionMode,

    #[serde(default)]
    pub extensions: Vec<String>,
}

impl MediaTypeConfig {
    pub fn inherit(media_type: MediaType) -> Self {
        Self {
            media_type,
            mode: ExtensionMode::Inherit,
            extensions: Vec::new(),
        }
    }

    /// Lowercase extensions (no leading dot) accepted for this type
    pub fn allowed_extensions(&self) -> BTreeSet<String> {
        let custom = self
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty());

        match self.mode {
            ExtensionMode::Inherit => self
                .media_type
                .default_extensions()
                .iter()
                .map(|e| e.to_string())
                .chain(custom)
                .collect(),
            ExtensionMode::Override => custom.collect(),
        }
    }
}

/// Per-session media collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOptions {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub media_types: Vec<MediaTypeConfig>,

    /// Size ceiling in megabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,

    /// Download timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<usize>,
}

impl MediaOptions {
    /// Resolves the download knobs, applying defaults
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            concurrent: self
                .concurrent
                .filter(|c| *c > 0)
                .unwrap_or(DEFAULT_CONCURRENT_DOWNLOADS),
            max_file_size_mb: self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE_MB),
            download_timeout: Duration::from_secs(
                self.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
        }
    }
}

/// Knobs for one `MediaDownloader::download` call
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Batch size; files within a batch download concurrently
    pub concurrent: usize,
    pub max_file_size_mb: u64,
    pub download_timeout: Duration,
}

impl DownloadOptions {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        MediaOptions {
            enabled: true,
            media_types: Vec::new(),
            max_file_size: None,
            download_timeout: None,
            concurrent: None,
        }
        .download_options()
    }
}

/// A detected media file; size, hash and storage path are set once downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileDescriptor {
    pub url: String,

    #[serde(rename = "type")]
    pub media_type: MediaType,

    pub extension: String,
    pub file_name: String,

    /// The page the file was found on
    pub source_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl MediaFileDescriptor {
    pub fn is_downloaded(&self) -> bool {
        self.storage_path.is_some()
    }
}

/// Broad reason a download failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadFailure {
    FileTooLarge,
    Network,
    Timeout,
    HttpStatus,
    Storage,
    InProgress,
}

/// Outcome of one file in a download call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub success: bool,
    pub file: MediaFileDescriptor,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DownloadFailure>,

    /// Satisfied by an already-stored file with the same content hash
    pub deduplicated: bool,
}
