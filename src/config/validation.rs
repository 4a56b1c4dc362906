use crate::config::types::{
    Config, PoolSettings, SchedulerSettings, StorageConfig, TaskEntry, UserAgentConfig,
};
use crate::scheduler::Schedule;
use crate::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_user_agent_config(&config.user_agent)?;
    validate_pool_settings(&config.pool)?;
    validate_scheduler_settings(&config.scheduler)?;
    validate_storage_config(&config.storage)?;
    validate_tasks(&config.tasks)?;
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates browser pool sizing
fn validate_pool_settings(pool: &PoolSettings) -> Result<(), ConfigError> {
    if pool.max_browsers == 0 {
        return Err(ConfigError::Validation(
            "max_browsers must be >= 1".to_string(),
        ));
    }

    if pool.min_browsers > pool.max_browsers {
        return Err(ConfigError::Validation(format!(
            "min_browsers ({}) cannot exceed max_browsers ({})",
            pool.min_browsers, pool.max_browsers
        )));
    }

    if pool.acquire_timeout == 0 {
        return Err(ConfigError::Validation(
            "acquire_timeout must be >= 1 second".to_string(),
        ));
    }

    if pool.navigation_timeout == 0 {
        return Err(ConfigError::Validation(
            "navigation_timeout must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates scheduler knobs
fn validate_scheduler_settings(scheduler: &SchedulerSettings) -> Result<(), ConfigError> {
    if scheduler.max_concurrent_tasks == 0 {
        return Err(ConfigError::Validation(
            "max_concurrent_tasks must be >= 1".to_string(),
        ));
    }

    if scheduler.tick_interval == 0 {
        return Err(ConfigError::Validation(
            "tick_interval must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage locations
fn validate_storage_config(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.bucket.is_empty() {
        return Err(ConfigError::Validation("bucket cannot be empty".to_string()));
    }

    if storage.root.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "storage root cannot be empty".to_string(),
        ));
    }

    if let Some(path) = &storage.database_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "database_path cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates task entries
fn validate_tasks(tasks: &[TaskEntry]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for task in tasks {
        if task.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Task name cannot be empty".to_string(),
            ));
        }

        if !names.insert(task.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate task name '{}'",
                task.name
            )));
        }

        if task.urls.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Task '{}' must have at least one URL",
                task.name
            )));
        }

        for url in &task.urls {
            validate_http_url(url, &task.name)?;
        }

        if let Some(webhook) = &task.webhook {
            validate_http_url(webhook, &task.name)?;
        }

        if let Some(schedule) = &task.schedule {
            schedule
                .parse::<Schedule>()
                .map_err(|e| ConfigError::InvalidSchedule(e.to_string()))?;
        }

        if task.batch.concurrency == 0 {
            return Err(ConfigError::Validation(format!(
                "Task '{}' batch concurrency must be >= 1",
                task.name
            )));
        }

        if let Some(threshold) = task.batch.quality_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ConfigError::Validation(format!(
                    "Task '{}' quality threshold must be between 0 and 100, got {}",
                    task.name, threshold
                )));
            }
        }

        for pattern in &task.crawl.exclude_patterns {
            Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!(
                    "Task '{}' has invalid exclude pattern '{}': {}",
                    task.name, pattern, e
                ))
            })?;
        }

        if let Some(domains) = &task.crawl.allowed_domains {
            for domain in domains {
                validate_domain_pattern(domain)?;
            }
        }

        if let Some(media) = &task.crawl.media {
            if media.types.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Task '{}' media section must list at least one type",
                    task.name
                )));
            }
            media.to_options()?;
        }
    }

    Ok(())
}

/// Requires an absolute http(s) URL
fn validate_http_url(raw: &str, task: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| {
        ConfigError::InvalidUrl(format!("Task '{}' has invalid URL '{}': {}", task, raw, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Task '{}' URL '{}' must use http or https",
            task, raw
        )));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::Validation(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
