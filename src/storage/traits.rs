//! Storage traits and error types
//!
//! This module defines the trait interface for metadata persistence and
//! the object-storage collaborator, along with their error type.

use crate::scheduler::{CrawlTask, TaskExecutionResult};
use crate::storage::SessionRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Object storage error: {0}")]
    Object(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence collaborator for session and task metadata
///
/// Implementations are synchronous and are shared behind a mutex
/// (see [`SharedMetadataStore`](crate::storage::SharedMetadataStore)).
pub trait MetadataStore: Send {
    // ===== Sessions =====

    /// Inserts or replaces a session summary
    fn save_session(&mut self, record: &SessionRecord) -> StorageResult<()>;

    /// Gets a session summary by ID
    fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Lists every stored session summary, oldest first
    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>>;

    // ===== Tasks =====

    /// Inserts or replaces a task record
    fn save_task(&mut self, task: &CrawlTask) -> StorageResult<()>;

    /// Deletes a task record
    ///
    /// # Returns
    ///
    /// `true` if a record was removed
    fn delete_task(&mut self, task_id: &str) -> StorageResult<bool>;

    /// Loads every task record in creation order
    fn load_tasks(&self) -> StorageResult<Vec<CrawlTask>>;

    // ===== Executions =====

    /// Appends one execution result to a task's history
    fn record_execution(&mut self, result: &TaskExecutionResult) -> StorageResult<()>;

    /// Gets a task's execution history, oldest first
    fn get_executions(&self, task_id: &str) -> StorageResult<Vec<TaskExecutionResult>>;
}

/// Object-storage collaborator for page records, screenshots and media
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `bucket/key`, replacing any existing object
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()>;

    /// Reads an object back, if present
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Produces a time-limited download URL for an object
    async fn presigned_get(&self, bucket: &str, key: &str, ttl: Duration)
        -> StorageResult<String>;
}
