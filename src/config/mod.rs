//! Configuration module for Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Pool holds at most {} browsers", config.pool.max_browsers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, PoolSettings, SchedulerSettings, StorageConfig, TaskBatchConfig, TaskCrawlConfig,
    TaskEntry, TaskMediaConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
