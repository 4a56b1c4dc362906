//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the MetadataStore
//! trait. Tasks and execution results are stored as JSON documents next to
//! a few indexed columns.

use crate::scheduler::{CrawlTask, TaskExecutionResult};
use crate::state::SessionStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{MetadataStore, StorageError, StorageResult};
use crate::storage::SessionRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite metadata store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at `path` and applies the schema
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("Bad timestamp '{}': {}", raw, e)))
}

struct RawSession {
    id: String,
    start_url: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    pages_processed: u32,
    error_count: i64,
    document: String,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_url: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            pages_processed: row.get(5)?,
            error_count: row.get(6)?,
            document: row.get(7)?,
        })
    }

    fn into_record(self) -> StorageResult<SessionRecord> {
        let status = SessionStatus::from_db_string(&self.status).ok_or_else(|| {
            StorageError::Database(format!("Unknown session status: {}", self.status))
        })?;

        Ok(SessionRecord {
            id: self.id,
            start_url: self.start_url,
            status,
            started_at: parse_timestamp(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_timestamp).transpose()?,
            pages_processed: self.pages_processed,
            error_count: usize::try_from(self.error_count).unwrap_or(0),
            document: serde_json::from_str(&self.document)?,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, start_url, status, started_at, ended_at, pages_processed, error_count, document";

impl MetadataStore for SqliteStore {
    // ===== Sessions =====

    fn save_session(&mut self, record: &SessionRecord) -> StorageResult<()> {
        let document = serde_json::to_string(&record.document)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions
             (id, start_url, status, started_at, ended_at, pages_processed, error_count, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.start_url,
                record.status.to_db_string(),
                record.started_at.to_rfc3339(),
                record.ended_at.map(|t| t.to_rfc3339()),
                record.pages_processed,
                record.error_count as i64,
                document,
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                RawSession::from_row,
            )
            .optional()?;

        raw.map(RawSession::into_record).transpose()
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY started_at",
            SESSION_COLUMNS
        ))?;

        let raws = stmt
            .query_map([], RawSession::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawSession::into_record).collect()
    }

    // ===== Tasks =====

    fn save_task(&mut self, task: &CrawlTask) -> StorageResult<()> {
        let document = serde_json::to_string(task)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO tasks
             (id, name, status, priority, next_run, created_at, updated_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.name,
                task.status.to_db_string(),
                task.priority,
                task.next_run.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                document,
            ],
        )?;
        Ok(())
    }

    fn delete_task(&mut self, task_id: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(removed > 0)
    }

    fn load_tasks(&self) -> StorageResult<Vec<CrawlTask>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM tasks ORDER BY created_at, id")?;

        let documents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| serde_json::from_str(doc).map_err(StorageError::from))
            .collect()
    }

    // ===== Executions =====

    fn record_execution(&mut self, result: &TaskExecutionResult) -> StorageResult<()> {
        let document = serde_json::to_string(result)?;
        self.conn.execute(
            "INSERT INTO task_executions (task_id, status, started_at, execution_time_ms, document)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.task_id,
                result.status.to_db_string(),
                result.start_time.to_rfc3339(),
                result.execution_time_ms as i64,
                document,
            ],
        )?;
        Ok(())
    }

    fn get_executions(&self, task_id: &str) -> StorageResult<Vec<TaskExecutionResult>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM task_executions WHERE task_id = ?1 ORDER BY id")?;

        let documents = stmt
            .query_map(params![task_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| serde_json::from_str(doc).map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BatchCrawlRequest, NewTask};
    use crate::state::TaskStatus;
    use chrono::Duration;

    fn session(id: &str, offset_secs: i64) -> SessionRecord {
        let started_at = Utc::now() + Duration::seconds(offset_secs);
        SessionRecord {
            id: id.to_string(),
            start_url: "https://example.com/".to_string(),
            status: SessionStatus::Completed,
            started_at,
            ended_at: Some(started_at + Duration::seconds(5)),
            pages_processed: 4,
            error_count: 1,
            document: serde_json::json!({ "summary": { "pagesProcessed": 4 } }),
        }
    }

    fn task(name: &str) -> CrawlTask {
        CrawlTask::from_new(NewTask::new(
            name,
            BatchCrawlRequest::new(vec!["https://example.com/".to_string()]),
        ))
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStore::new_in_memory().is_ok());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.db");

        let mut store = SqliteStore::new(&path).unwrap();
        store.save_session(&session("s1", 0)).unwrap();
        drop(store);

        let reopened = SqliteStore::new(&path).unwrap();
        assert!(reopened.get_session("s1").unwrap().is_some());
    }

    #[test]
    fn test_session_roundtrip() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let record = session("s1", 0);
        store.save_session(&record).unwrap();

        let loaded = store.get_session("s1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_session_replaces_existing() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let mut record = session("s1", 0);
        store.save_session(&record).unwrap();

        record.status = SessionStatus::Failed;
        store.save_session(&record).unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Failed);
    }

    #[test]
    fn test_list_sessions_oldest_first() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        store.save_session(&session("late", 10)).unwrap();
        store.save_session(&session("early", 0)).unwrap();

        let ids: Vec<String> = store.list_sessions().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_task_persistence() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let mut first = task("first");
        store.save_task(&first).unwrap();
        store.save_task(&task("second")).unwrap();

        first.status = TaskStatus::Paused;
        store.save_task(&first).unwrap();

        let tasks = store.load_tasks().unwrap();
        assert_eq!(tasks.len(), 2);
        let loaded = tasks.iter().find(|t| t.id == first.id).unwrap();
        assert_eq!(loaded.status, TaskStatus::Paused);
        assert_eq!(loaded.request.urls, vec!["https://example.com/".to_string()]);

        assert!(store.delete_task(&first.id).unwrap());
        assert!(!store.delete_task(&first.id).unwrap());
        assert_eq!(store.load_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_execution_history() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let now = Utc::now();
        for (status, error) in [
            (TaskStatus::Failed, Some("boom".to_string())),
            (TaskStatus::Completed, None),
        ] {
            store
                .record_execution(&TaskExecutionResult {
                    task_id: "t1".to_string(),
                    status,
                    start_time: now,
                    end_time: now,
                    execution_time_ms: 12,
                    result: None,
                    error,
                    retry_count: 0,
                })
                .unwrap();
        }

        let history = store.get_executions("t1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].error.as_deref(), Some("boom"));
        assert_eq!(history[1].status, TaskStatus::Completed);
        assert!(store.get_executions("other").unwrap().is_empty());
    }
}
