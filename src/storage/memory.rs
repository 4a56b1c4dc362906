//! In-memory metadata store, used by tests and when no database is configured

use crate::scheduler::{CrawlTask, TaskExecutionResult};
use crate::storage::traits::{MetadataStore, StorageResult};
use crate::storage::SessionRecord;
use std::collections::HashMap;

/// Process-local [`MetadataStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: HashMap<String, SessionRecord>,
    tasks: HashMap<String, CrawlTask>,
    executions: Vec<TaskExecutionResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn save_session(&mut self, record: &SessionRecord) -> StorageResult<()> {
        self.sessions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        Ok(self.sessions.get(session_id).cloned())
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    fn save_task(&mut self, task: &CrawlTask) -> StorageResult<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete_task(&mut self, task_id: &str) -> StorageResult<bool> {
        Ok(self.tasks.remove(task_id).is_some())
    }

    fn load_tasks(&self) -> StorageResult<Vec<CrawlTask>> {
        let mut tasks: Vec<CrawlTask> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn record_execution(&mut self, result: &TaskExecutionResult) -> StorageResult<()> {
        self.executions.push(result.clone());
        Ok(())
    }

    fn get_executions(&self, task_id: &str) -> StorageResult<Vec<TaskExecutionResult>> {
        Ok(self
            .executions
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BatchCrawlRequest, NewTask};

    #[test]
    fn test_task_save_and_delete() {
        let mut store = MemoryStore::new();
        let task = CrawlTask::from_new(NewTask::new(
            "nightly",
            BatchCrawlRequest::new(vec!["https://example.com/".to_string()]),
        ));

        store.save_task(&task).unwrap();
        assert_eq!(store.load_tasks().unwrap().len(), 1);

        assert!(store.delete_task(&task.id).unwrap());
        assert!(store.load_tasks().unwrap().is_empty());
    }
}
