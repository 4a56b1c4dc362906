//! Storage module for persisting crawl data
//!
//! This module handles the two persistence collaborators:
//! - metadata (session summaries, task records, execution history) behind
//!   the [`MetadataStore`] trait, backed by SQLite or memory
//! - objects (page records, screenshots, media) behind [`ObjectStore`]

mod memory;
mod object;
pub mod paths;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use object::{LocalObjectStore, MemoryObjectStore, StoredObject};
pub use sqlite::SqliteStore;
pub use traits::{MetadataStore, ObjectStore, StorageError, StorageResult};

use crate::state::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Metadata store shared between the orchestrator and the scheduler
pub type SharedMetadataStore = Arc<Mutex<dyn MetadataStore>>;

/// Wraps a store for sharing
pub fn shared<S: MetadataStore + 'static>(store: S) -> SharedMetadataStore {
    Arc::new(Mutex::new(store))
}

/// Locks a shared store, recovering from a poisoned mutex
pub fn lock(store: &SharedMetadataStore) -> MutexGuard<'_, dyn MetadataStore + 'static> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens the SQLite metadata store at `path`, or a memory store if `None`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SharedMetadataStore)` - Store ready for use
/// * `Err(StorageError)` - Failed to open the database
pub fn open_metadata_store(path: Option<&Path>) -> StorageResult<SharedMetadataStore> {
    match path {
        Some(path) => {
            tracing::debug!("Opening metadata database at {}", path.display());
            Ok(shared(SqliteStore::new(path)?))
        }
        None => Ok(shared(MemoryStore::new())),
    }
}

/// Summary of one crawl session, written when the session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub start_url: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pages_processed: u32,
    pub error_count: usize,

    /// Session snapshot, frontier stats and summary as one JSON document
    pub document: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_store() {
        let store = open_metadata_store(None).unwrap();
        assert!(lock(&store).list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_metadata_store(Some(&dir.path().join("meta.db"))).unwrap();
        assert!(lock(&store).load_tasks().unwrap().is_empty());
    }
}
