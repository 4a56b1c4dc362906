use crate::browser::{NavigateOptions, PoolConfig};
use crate::crawler::CrawlSettings;
use crate::media::{MediaOptions, MediaType, MediaTypeConfig};
use crate::scheduler::{BatchCrawlRequest, BatchOptions, NewTask, Schedule, SchedulerConfig};
use crate::state::TaskPriority;
use crate::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Browser pool sizing and timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolSettings {
    #[serde(default = "default_min_browsers")]
    pub min_browsers: usize,

    #[serde(default = "default_max_browsers")]
    pub max_browsers: usize,

    /// Seconds a caller waits for a lease before giving up
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// Per-page navigation timeout in seconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_browsers: default_min_browsers(),
            max_browsers: default_max_browsers(),
            acquire_timeout: default_acquire_timeout(),
            navigation_timeout: default_navigation_timeout(),
        }
    }
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_browsers: self.min_browsers,
            max_browsers: self.max_browsers,
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
        }
    }

    pub fn navigate_options(&self) -> NavigateOptions {
        NavigateOptions {
            timeout: Duration::from_secs(self.navigation_timeout),
        }
    }
}

/// Task scheduler knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerSettings {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Base retry delay in seconds, multiplied by the retry count
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Seconds between scans for due recurring tasks
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retry_delay: default_retry_delay(),
            tick_interval: default_tick_interval(),
        }
    }
}

impl SchedulerSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            retry_delay: Duration::from_secs(self.retry_delay),
            tick_interval: Duration::from_secs(self.tick_interval),
        }
    }
}

/// Where page records, media and metadata are written
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Root directory of the local object store
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// SQLite metadata database; metadata stays in memory when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            database_path: None,
        }
    }
}

/// A named batch-crawl job loaded into the scheduler at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskEntry {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub urls: Vec<String>,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval expression, e.g. "@every 6h" or "@daily"
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub webhook: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub crawl: TaskCrawlConfig,

    #[serde(default)]
    pub batch: TaskBatchConfig,
}

impl TaskEntry {
    /// Builds the scheduler's task definition from this entry
    ///
    /// # Returns
    ///
    /// * `Ok(NewTask)` - Ready for `TaskScheduler::create_task`
    /// * `Err(ConfigError)` - The schedule or a media type name is invalid
    pub fn to_new_task(&self) -> Result<NewTask, ConfigError> {
        let schedule = self
            .schedule
            .as_deref()
            .map(|expr| {
                expr.parse::<Schedule>()
                    .map_err(|e| ConfigError::InvalidSchedule(e.to_string()))
            })
            .transpose()?;

        let request = BatchCrawlRequest {
            urls: self.urls.clone(),
            config: self.crawl.to_settings()?,
            options: self.batch.to_options(),
        };

        Ok(NewTask {
            description: self.description.clone(),
            schedule,
            enabled: self.enabled,
            priority: self.priority,
            max_retries: self.max_retries,
            tags: self.tags.clone(),
            webhook: self.webhook.clone(),
            ..NewTask::new(self.name.clone(), request)
        })
    }
}

/// Per-session crawl rules of a task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskCrawlConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default)]
    pub take_screenshots: bool,

    /// Defaults to each start URL's own host
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub media: Option<TaskMediaConfig>,
}

impl Default for TaskCrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            take_screenshots: false,
            allowed_domains: None,
            exclude_patterns: Vec::new(),
            media: None,
        }
    }
}

impl TaskCrawlConfig {
    pub fn to_settings(&self) -> Result<CrawlSettings, ConfigError> {
        Ok(CrawlSettings {
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            take_screenshots: self.take_screenshots,
            allowed_domains: self.allowed_domains.clone(),
            exclude_patterns: self.exclude_patterns.clone(),
            media_options: self.media.as_ref().map(|m| m.to_options()).transpose()?,
        })
    }
}

/// Media collection for a task's sessions
///
/// Every listed type inherits its default extensions plus `extensions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskMediaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub types: Vec<String>,

    #[serde(default)]
    pub extensions: Vec<String>,

    /// Megabytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Seconds
    #[serde(default)]
    pub download_timeout: Option<u64>,

    #[serde(default)]
    pub concurrent: Option<usize>,
}

impl TaskMediaConfig {
    pub fn to_options(&self) -> Result<MediaOptions, ConfigError> {
        let media_types = self
            .types
            .iter()
            .map(|name| {
                let media_type = MediaType::from_name(name).ok_or_else(|| {
                    ConfigError::Validation(format!("Unknown media type '{}'", name))
                })?;
                Ok(MediaTypeConfig {
                    extensions: self.extensions.clone(),
                    ..MediaTypeConfig::inherit(media_type)
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(MediaOptions {
            enabled: self.enabled,
            media_types,
            max_file_size: self.max_file_size,
            download_timeout: self.download_timeout,
            concurrent: self.concurrent,
        })
    }
}

/// Batch-crawl fan-out for a task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskBatchConfig {
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,

    /// Milliseconds between batches
    #[serde(default = "default_batch_delay")]
    pub delay: u64,

    #[serde(default = "default_batch_retries")]
    pub retries: u32,

    #[serde(default = "default_true")]
    pub enable_deduplication: bool,

    #[serde(default)]
    pub quality_threshold: Option<f64>,
}

impl Default for TaskBatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_batch_concurrency(),
            delay: default_batch_delay(),
            retries: default_batch_retries(),
            enable_deduplication: true,
            quality_threshold: None,
        }
    }
}

impl TaskBatchConfig {
    pub fn to_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency,
            delay: self.delay,
            retries: self.retries,
            enable_deduplication: self.enable_deduplication,
            quality_threshold: self.quality_threshold,
        }
    }
}

fn default_min_browsers() -> usize {
    2
}

fn default_max_browsers() -> usize {
    10
}

fn default_acquire_timeout() -> u64 {
    60
}

fn default_navigation_timeout() -> u64 {
    30
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_retry_delay() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    60
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./harvest-data")
}

fn default_bucket() -> String {
    "harvester".to_string()
}

fn default_priority() -> u8 {
    TaskPriority::Normal.value()
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    10
}

fn default_batch_concurrency() -> usize {
    5
}

fn default_batch_delay() -> u64 {
    1000
}

fn default_batch_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}
