//! Task records and execution results

use crate::scheduler::batch::{BatchCrawlRequest, BatchCrawlResult};
use crate::scheduler::schedule::Schedule;
use crate::state::{TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of retries after a failed execution
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A scheduled or ad-hoc batch crawl job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlTask {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub request: BatchCrawlRequest,

    /// Recurrence; None for one-shot tasks
    pub schedule: Option<Schedule>,
    pub enabled: bool,

    /// Higher runs first
    pub priority: u8,
    pub max_retries: u32,

    /// Failed executions since the last success
    pub retry_count: u32,
    pub status: TaskStatus,
    pub tags: Vec<String>,

    /// URL that receives every execution result
    pub webhook: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlTask {
    /// Builds a pending task from its creation input
    ///
    /// Scheduled tasks get their first `next_run` one interval from now.
    pub fn from_new(new: NewTask) -> Self {
        let now = Utc::now();
        let next_run = new.schedule.as_ref().map(|s| s.next_after(now));

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            request: new.request,
            schedule: new.schedule,
            enabled: new.enabled,
            priority: new.priority,
            max_retries: new.max_retries,
            retry_count: 0,
            status: TaskStatus::Pending,
            tags: new.tags,
            webhook: new.webhook,
            last_run: None,
            next_run,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.is_some()
    }

    /// Returns true if the schedule says the task should run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.schedule.is_some()
            && self.status != TaskStatus::Running
            && self.next_run.map_or(false, |next| next <= now)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub request: BatchCrawlRequest,
    pub schedule: Option<Schedule>,
    pub enabled: bool,
    pub priority: u8,
    pub max_retries: u32,
    pub tags: Vec<String>,
    pub webhook: Option<String>,
}

impl NewTask {
    /// A one-shot, enabled task at normal priority
    pub fn new(name: impl Into<String>, request: BatchCrawlRequest) -> Self {
        Self {
            name: name.into(),
            description: None,
            request,
            schedule: None,
            enabled: true,
            priority: TaskPriority::Normal.value(),
            max_retries: DEFAULT_MAX_RETRIES,
            tags: Vec::new(),
            webhook: None,
        }
    }
}

/// Partial update of a task; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub request: Option<BatchCrawlRequest>,
    pub schedule: Option<Schedule>,
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
    pub tags: Option<Vec<String>>,
    pub webhook: Option<String>,
}

impl TaskUpdate {
    pub(crate) fn apply(self, task: &mut CrawlTask) {
        if let Some(name) = self.name {
            task.name = name;
        }
        if let Some(description) = self.description {
            task.description = Some(description);
        }
        if let Some(request) = self.request {
            task.request = request;
        }
        if let Some(schedule) = self.schedule {
            task.next_run = Some(schedule.next_after(Utc::now()));
            task.schedule = Some(schedule);
        }
        if let Some(enabled) = self.enabled {
            task.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(max_retries) = self.max_retries {
            task.max_retries = max_retries;
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        if let Some(webhook) = self.webhook {
            task.webhook = Some(webhook);
        }
        task.touch();
    }
}

/// Outcome of one task execution, persisted and sent to the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionResult {
    pub task_id: String,

    /// Status the task was left in
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub result: Option<BatchCrawlResult>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl TaskExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
