//! Media acquisition pipeline
//!
//! - `detector`: classifies a page's media elements into descriptors
//! - `downloader`: bounded, size-gated, content-deduplicated downloads
//! - `catalog`: per-session media collections and their metadata document

mod catalog;
mod detector;
mod downloader;
mod types;

pub use catalog::{MediaCatalog, MediaQuery, MediaStats, DOWNLOAD_URL_TTL};
pub use detector::{classify_elements, detect, file_name_for};
pub use downloader::{DownloadError, DownloaderStats, MediaDownloader};
pub use types::{
    DownloadFailure, DownloadOptions, DownloadResult, ExtensionMode, MediaFileDescriptor,
    MediaOptions, MediaType, MediaTypeConfig, DEFAULT_CONCURRENT_DOWNLOADS,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_FILE_SIZE_MB,
};
