//! Harvester: a stateful crawl orchestrator
//!
//! This crate drives browser-backed crawl sessions over a bounded URL
//! frontier, leases browsers from a finite pool, downloads and deduplicates
//! embedded media, and schedules recurring or ad-hoc batch crawl jobs with
//! bounded concurrency and retry backoff.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod media;
pub mod output;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Browser pool error: {0}")]
    Pool(#[from] browser::PoolError),

    #[error("Download error: {0}")]
    Download(#[from] media::DownloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Session aborted: {0}")]
    FatalSession(String),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// URL and link-policy errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Result type alias for Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use browser::{BrowserLease, BrowserPool, PoolConfig, PoolStats};
pub use config::Config;
pub use crawler::{CrawlRequest, CrawlResponse, CrawlSession, Orchestrator};
pub use frontier::{Frontier, FrontierEntry};
pub use media::{MediaCatalog, MediaDownloader, MediaFileDescriptor, MediaType};
pub use scheduler::{CrawlTask, TaskScheduler};
pub use state::{SessionStatus, TaskStatus};
pub use url::LinkPolicy;
