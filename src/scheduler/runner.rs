//! The task scheduler
//!
//! Tasks live in an injected, mutex-guarded state owned by one
//! [`TaskScheduler`] (cheap to clone, all clones share it). Pending tasks
//! wait in a priority [`RunQueue`]; a dispatch pass starts queued tasks
//! while fewer than `max_concurrent_tasks` are in flight.
//!
//! Every execution, dispatched or triggered through
//! [`execute_task`](TaskScheduler::execute_task), goes through one path:
//! `running`, then `completed` (retry count reset) or, on failure, back to
//! `pending` after `retry_delay * retry_count`. Once the retry count
//! exceeds `max_retries` the task is `failed` for good.

use crate::scheduler::batch::{BatchCrawlRequest, BatchCrawler};
use crate::scheduler::notifier::TaskNotifier;
use crate::scheduler::queue::RunQueue;
use crate::scheduler::task::{CrawlTask, NewTask, TaskExecutionResult, TaskUpdate};
use crate::state::TaskStatus;
use crate::storage::{self, SharedMetadataStore, StorageError};
use crate::url::parse_start_url;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;

const EVENT_CAPACITY: usize = 256;

/// Errors returned by scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task is already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid task: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Scheduler knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tasks executing at the same time through dispatch
    pub max_concurrent_tasks: usize,

    /// Base delay before a failed task is requeued
    pub retry_delay: Duration,

    /// Period of [`TaskScheduler::spawn_ticker`]
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            retry_delay: Duration::from_secs(60),
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// A task status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub paused_tasks: usize,
    pub cancelled_tasks: usize,

    /// Mean duration of successful executions, in milliseconds
    pub average_execution_time: f64,

    /// Completed tasks as a percentage of all tasks
    pub success_rate: f64,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, CrawlTask>,
    queue: RunQueue,

    /// Tasks currently executing
    running: HashSet<String>,

    /// Failed tasks waiting out their retry delay
    retrying: HashSet<String>,

    successful_runs: u64,
    successful_time_ms: u64,
}

struct Shared {
    config: SchedulerConfig,
    crawler: Arc<dyn BatchCrawler>,
    notifier: Arc<dyn TaskNotifier>,
    store: SharedMetadataStore,
    state: Mutex<SchedulerState>,
    events: broadcast::Sender<TaskEvent>,
    changed: Notify,
}

/// Priority scheduler for batch crawl tasks
///
/// Operations that may start work spawn onto the current Tokio runtime.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    /// Creates a scheduler with no tasks
    ///
    /// # Arguments
    ///
    /// * `config` - Concurrency cap, retry delay and tick period
    /// * `crawler` - Executes each task's batch request
    /// * `notifier` - Receives execution results for tasks with a webhook
    /// * `store` - Persists task records and execution history
    pub fn new(
        config: SchedulerConfig,
        crawler: Arc<dyn BatchCrawler>,
        notifier: Arc<dyn TaskNotifier>,
        store: SharedMetadataStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config: SchedulerConfig {
                    max_concurrent_tasks: config.max_concurrent_tasks.max(1),
                    ..config
                },
                crawler,
                notifier,
                store,
                state: Mutex::new(SchedulerState::default()),
                events,
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives every status transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    fn emit(&self, task_id: &str, status: TaskStatus) {
        // No receivers is fine
        let _ = self.shared.events.send(TaskEvent {
            task_id: task_id.to_string(),
            status,
        });
    }

    fn persist(&self, task: &CrawlTask) {
        if let Err(e) = storage::lock(&self.shared.store).save_task(task) {
            tracing::warn!(task_id = %task.id, "Failed to persist task: {}", e);
        }
    }

    fn notify_changed(&self) {
        self.shared.changed.notify_waiters();
    }

    /// Loads persisted tasks
    ///
    /// Tasks left `running` by a previous process are reset to `pending`.
    /// Pending one-shot tasks, and recurring tasks that were between
    /// retries, are queued and dispatched.
    ///
    /// # Returns
    ///
    /// The number of tasks loaded
    pub fn load_from_store(&self) -> Result<usize, SchedulerError> {
        let tasks = storage::lock(&self.shared.store).load_tasks()?;
        let count = tasks.len();

        {
            let mut state = self.lock();
            for mut task in tasks {
                if task.status == TaskStatus::Running {
                    tracing::info!(task_id = %task.id, "Resetting interrupted task to pending");
                    task.status = TaskStatus::Pending;
                    task.touch();
                    self.persist(&task);
                }

                let runnable = task.status == TaskStatus::Pending
                    && task.enabled
                    && (!task.is_recurring() || task.retry_count > 0);
                if runnable {
                    state.queue.push(&task.id, task.priority);
                }
                state.tasks.insert(task.id.clone(), task);
            }
        }

        tracing::info!("Loaded {} tasks", count);
        self.dispatch();
        Ok(count)
    }

    /// Creates a task
    ///
    /// One-shot tasks are queued right away; recurring tasks wait for their
    /// first `next_run`.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlTask)` - The stored task
    /// * `Err(SchedulerError::InvalidInput)` - Empty name, no URLs, or a bad URL
    pub fn create_task(&self, new: NewTask) -> Result<CrawlTask, SchedulerError> {
        validate_task(&new.name, &new.request, new.webhook.as_deref())?;

        let task = CrawlTask::from_new(new);
        storage::lock(&self.shared.store).save_task(&task)?;

        {
            let mut state = self.lock();
            if task.enabled && !task.is_recurring() {
                state.queue.push(&task.id, task.priority);
            }
            state.tasks.insert(task.id.clone(), task.clone());
        }

        tracing::info!(task_id = %task.id, "Created task '{}' (priority {})", task.name, task.priority);
        self.emit(&task.id, task.status);
        self.dispatch();
        Ok(task)
    }

    /// Applies a partial update
    ///
    /// A queued task is re-queued under its new priority.
    pub fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<CrawlTask, SchedulerError> {
        if let Some(request) = &update.request {
            validate_urls(request)?;
        }
        if update.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
            return Err(SchedulerError::InvalidInput("Task name is empty".to_string()));
        }

        let updated = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

            update.apply(task);
            if state.queue.remove(task_id) {
                state.queue.push(task_id, task.priority);
            }
            self.persist(task);
            task.clone()
        };

        self.dispatch();
        Ok(updated)
    }

    /// Deletes a task and its queue entry
    ///
    /// A running execution finishes but its outcome is only recorded in the
    /// execution history.
    ///
    /// # Returns
    ///
    /// `true` if the task existed
    pub fn delete_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        let existed = {
            let mut state = self.lock();
            state.queue.remove(task_id);
            state.retrying.remove(task_id);
            state.tasks.remove(task_id).is_some()
        };

        storage::lock(&self.shared.store).delete_task(task_id)?;
        if existed {
            tracing::info!(task_id, "Deleted task");
            self.notify_changed();
        }
        Ok(existed)
    }

    pub fn get_task(&self, task_id: &str) -> Option<CrawlTask> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// Every task, oldest first
    pub fn get_all_tasks(&self) -> Vec<CrawlTask> {
        let mut tasks: Vec<CrawlTask> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<CrawlTask> {
        self.get_all_tasks()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    /// Runs a task now, outside the concurrency cap, and waits for it
    ///
    /// # Returns
    ///
    /// * `Ok(TaskExecutionResult)` - The execution finished (successfully or not)
    /// * `Err(SchedulerError::NotFound)` - Unknown task
    /// * `Err(SchedulerError::AlreadyRunning)` - The task is executing
    pub async fn execute_task(&self, task_id: &str) -> Result<TaskExecutionResult, SchedulerError> {
        let request = {
            let mut state = self.lock();
            match state.tasks.get(task_id) {
                None => return Err(SchedulerError::NotFound(task_id.to_string())),
                Some(task) if task.status == TaskStatus::Running => {
                    return Err(SchedulerError::AlreadyRunning(task_id.to_string()))
                }
                Some(_) => {}
            }
            self.start_locked(&mut state, task_id)
                .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?
        };

        Ok(self
            .run_started(task_id.to_string(), request)
            .instrument(tracing::info_span!("task", task_id = %task_id))
            .await)
    }

    /// Holds a task back from scheduling
    ///
    /// A running execution finishes, but the task stays paused.
    ///
    /// # Returns
    ///
    /// `false` if the task is already paused or cancelled
    pub fn pause_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        self.transition(task_id, TaskStatus::Paused, |status| {
            !matches!(status, TaskStatus::Paused | TaskStatus::Cancelled)
        })
    }

    /// Returns a paused task to the queue
    ///
    /// # Returns
    ///
    /// `false` if the task is not paused
    pub fn resume_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        let resumed = self.transition(task_id, TaskStatus::Pending, |status| {
            status == TaskStatus::Paused
        })?;
        if resumed {
            self.dispatch();
        }
        Ok(resumed)
    }

    /// Cancels a task and removes it from the queue
    ///
    /// # Returns
    ///
    /// `false` if the task is already cancelled
    pub fn cancel_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        self.transition(task_id, TaskStatus::Cancelled, |status| {
            status != TaskStatus::Cancelled
        })
    }

    fn transition(
        &self,
        task_id: &str,
        to: TaskStatus,
        allowed: impl FnOnce(TaskStatus) -> bool,
    ) -> Result<bool, SchedulerError> {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

            if !allowed(task.status) {
                return Ok(false);
            }

            task.status = to;
            task.touch();
            self.persist(task);

            if to == TaskStatus::Pending {
                if task.enabled && !state.running.contains(task_id) {
                    state.queue.push(task_id, task.priority);
                }
            } else {
                state.queue.remove(task_id);
                state.retrying.remove(task_id);
            }
        }

        tracing::info!(task_id, "Task is now {}", to);
        self.emit(task_id, to);
        self.notify_changed();
        Ok(true)
    }

    /// Queues every recurring task due now
    pub fn tick(&self) -> usize {
        self.tick_at(Utc::now())
    }

    /// Queues every recurring task due at `now` and advances its `next_run`
    ///
    /// A task still waiting out a retry delay is not queued early; its retry
    /// runs when the delay ends.
    ///
    /// # Returns
    ///
    /// The number of tasks queued
    pub fn tick_at(&self, now: DateTime<Utc>) -> usize {
        let mut queued = Vec::new();

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            for task in state.tasks.values_mut() {
                let held = matches!(task.status, TaskStatus::Paused | TaskStatus::Cancelled);
                if held || !task.is_due(now) {
                    continue;
                }

                // a pending retry keeps its backoff; only the schedule moves on
                if state.retrying.contains(&task.id) {
                    task.next_run = task.schedule.as_ref().map(|s| s.next_after(now));
                    task.touch();
                    self.persist(task);
                    continue;
                }

                if task.status == TaskStatus::Failed {
                    task.retry_count = 0;
                }
                task.status = TaskStatus::Pending;
                task.next_run = task.schedule.as_ref().map(|s| s.next_after(now));
                task.touch();
                self.persist(task);

                state.queue.push(&task.id, task.priority);
                queued.push(task.id.clone());
            }
        }

        for task_id in &queued {
            tracing::debug!(task_id = %task_id, "Recurring task is due");
            self.emit(task_id, TaskStatus::Pending);
        }
        if !queued.is_empty() {
            self.dispatch();
        }
        queued.len()
    }

    /// Calls [`tick`](Self::tick) every `tick_interval` until the handle is aborted
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.shared.config.tick_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                scheduler.tick();
            }
        })
    }

    /// Starts queued tasks while capacity remains
    pub fn dispatch(&self) {
        let mut started = Vec::new();

        {
            let mut state = self.lock();
            while state.running.len() < self.shared.config.max_concurrent_tasks {
                let Some(next) = state.queue.pop() else {
                    break;
                };

                let ready = state
                    .tasks
                    .get(&next.task_id)
                    .map_or(false, |t| t.status == TaskStatus::Pending && t.enabled);
                if !ready {
                    continue;
                }

                if let Some(request) = self.start_locked(&mut state, &next.task_id) {
                    started.push((next.task_id, request));
                }
            }
        }

        for (task_id, request) in started {
            let scheduler = self.clone();
            let span = tracing::info_span!("task", task_id = %task_id);
            tokio::spawn(
                async move {
                    scheduler.run_started(task_id, request).await;
                }
                .instrument(span),
            );
        }
    }

    fn start_locked(&self, state: &mut SchedulerState, task_id: &str) -> Option<BatchCrawlRequest> {
        let task = state.tasks.get_mut(task_id)?;
        task.status = TaskStatus::Running;
        task.last_run = Some(Utc::now());
        task.touch();
        self.persist(task);
        let request = task.request.clone();

        state.queue.remove(task_id);
        state.retrying.remove(task_id);
        state.running.insert(task_id.to_string());
        self.emit(task_id, TaskStatus::Running);
        Some(request)
    }

    async fn run_started(&self, task_id: String, request: BatchCrawlRequest) -> TaskExecutionResult {
        let start_time = Utc::now();
        let timer = Instant::now();
        tracing::info!("Executing task over {} URLs", request.urls.len());

        let outcome = self.shared.crawler.batch_crawl(&request).await;
        let execution_time_ms = timer.elapsed().as_millis() as u64;

        let (batch, error) = match outcome {
            Ok(batch) => (Some(batch), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let (result, webhook, retry_in) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.running.remove(&task_id);

            let mut retry_in = None;
            let (status, retry_count, webhook) = match state.tasks.get_mut(&task_id) {
                None => {
                    let status = if error.is_none() {
                        TaskStatus::Completed
                    } else {
                        TaskStatus::Failed
                    };
                    (status, 0, None)
                }
                Some(task) => {
                    let held = matches!(task.status, TaskStatus::Paused | TaskStatus::Cancelled);

                    if error.is_none() {
                        task.retry_count = 0;
                        if !held {
                            task.status = TaskStatus::Completed;
                        }
                        state.successful_runs += 1;
                        state.successful_time_ms += execution_time_ms;
                    } else if !held {
                        task.retry_count += 1;
                        if task.retry_count > task.max_retries {
                            task.status = TaskStatus::Failed;
                        } else {
                            task.status = TaskStatus::Pending;
                            retry_in = Some(self.shared.config.retry_delay * task.retry_count);
                            state.retrying.insert(task_id.clone());
                        }
                    }

                    task.touch();
                    self.persist(task);
                    self.emit(&task_id, task.status);
                    (task.status, task.retry_count, task.webhook.clone())
                }
            };

            let result = TaskExecutionResult {
                task_id: task_id.clone(),
                status,
                start_time,
                end_time: Utc::now(),
                execution_time_ms,
                result: batch,
                error,
                retry_count,
            };
            (result, webhook, retry_in)
        };

        match &result.error {
            None => tracing::info!("Task completed in {}ms", execution_time_ms),
            Some(e) if result.status == TaskStatus::Failed => {
                tracing::error!("Task failed after {} retries: {}", result.retry_count.saturating_sub(1), e)
            }
            Some(e) => tracing::warn!("Task execution failed (attempt {}): {}", result.retry_count, e),
        }

        if let Err(e) = storage::lock(&self.shared.store).record_execution(&result) {
            tracing::warn!("Failed to record execution: {}", e);
        }

        if let Some(webhook) = webhook {
            if let Err(e) = self.shared.notifier.notify(&webhook, &result).await {
                tracing::warn!("Webhook delivery to {} failed: {}", webhook, e);
            }
        }

        if let Some(delay) = retry_in {
            self.schedule_retry(task_id, delay);
        }

        self.dispatch();
        self.notify_changed();
        result
    }

    fn schedule_retry(&self, task_id: String, delay: Duration) {
        tracing::debug!(task_id = %task_id, "Retrying in {:?}", delay);
        let scheduler = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut guard = scheduler.lock();
                let state = &mut *guard;
                if state.retrying.remove(&task_id) {
                    if let Some(task) = state.tasks.get(&task_id) {
                        if task.status == TaskStatus::Pending && task.enabled {
                            state.queue.push(&task_id, task.priority);
                        }
                    }
                }
            }

            scheduler.dispatch();
            scheduler.notify_changed();
        });
    }

    /// Counters over every known task
    pub fn get_stats(&self) -> SchedulerStats {
        let state = self.lock();
        let mut stats = SchedulerStats {
            total_tasks: state.tasks.len(),
            ..SchedulerStats::default()
        };

        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Running => stats.running_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed => stats.failed_tasks += 1,
                TaskStatus::Paused => stats.paused_tasks += 1,
                TaskStatus::Cancelled => stats.cancelled_tasks += 1,
            }
        }

        if state.successful_runs > 0 {
            stats.average_execution_time =
                round2(state.successful_time_ms as f64 / state.successful_runs as f64);
        }
        if stats.total_tasks > 0 {
            stats.success_rate = round2(stats.completed_tasks as f64 / stats.total_tasks as f64 * 100.0);
        }
        stats
    }

    /// Returns true once nothing is executing and no enabled task has work left
    ///
    /// A one-shot task is done once terminal or paused. A recurring task is
    /// only done once paused or cancelled, since a completed or failed run
    /// comes due again on a later tick.
    pub fn is_settled(&self) -> bool {
        let state = self.lock();
        state.running.is_empty()
            && state.tasks.values().all(|t| {
                let done = if t.is_recurring() {
                    t.status == TaskStatus::Cancelled
                } else {
                    t.status.is_terminal()
                };
                !t.enabled || done || t.status == TaskStatus::Paused
            })
    }

    /// Waits until [`is_settled`](Self::is_settled) holds
    pub async fn wait_until_settled(&self) {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.is_settled() {
                return;
            }
            changed.await;
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validate_task(
    name: &str,
    request: &BatchCrawlRequest,
    webhook: Option<&str>,
) -> Result<(), SchedulerError> {
    if name.trim().is_empty() {
        return Err(SchedulerError::InvalidInput("Task name is empty".to_string()));
    }
    validate_urls(request)?;

    if let Some(webhook) = webhook {
        parse_start_url(webhook)
            .map_err(|e| SchedulerError::InvalidInput(format!("Invalid webhook '{}': {}", webhook, e)))?;
    }
    Ok(())
}

fn validate_urls(request: &BatchCrawlRequest) -> Result<(), SchedulerError> {
    if request.urls.is_empty() {
        return Err(SchedulerError::InvalidInput("Task has no URLs".to_string()));
    }
    for url in &request.urls {
        parse_start_url(url)
            .map_err(|e| SchedulerError::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
    }
    if request.config.max_pages == 0 {
        return Err(SchedulerError::InvalidInput("maxPages must be at least 1".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::batch::BatchCrawlResult;
    use crate::scheduler::schedule::Schedule;
    use crate::storage::{shared, MemoryStore, MetadataStore};
    use crate::HarvestError;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Records every batch; URLs containing "fail" fail, URLs containing
    /// "gate" wait for a permit
    struct ScriptedCrawler {
        calls: Mutex<Vec<String>>,
        gate: Semaphore,
    }

    impl ScriptedCrawler {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: Semaphore::new(0),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchCrawler for ScriptedCrawler {
        async fn batch_crawl(&self, request: &BatchCrawlRequest) -> Result<BatchCrawlResult, HarvestError> {
            let url = request.urls[0].clone();
            self.calls.lock().unwrap().push(url.clone());

            if url.contains("gate") {
                self.gate.acquire().await.unwrap().forget();
            }
            if url.contains("fail") {
                return Err(HarvestError::TaskExecution(format!("{} failed", url)));
            }

            Ok(BatchCrawlResult {
                total_urls: 1,
                success_count: 1,
                failure_count: 0,
                skipped_count: 0,
                results: Vec::new(),
                start_time: Utc::now(),
                end_time: Utc::now(),
                total_time_ms: 0,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, TaskExecutionResult)>>,
    }

    #[async_trait]
    impl TaskNotifier for RecordingNotifier {
        async fn notify(&self, webhook: &str, result: &TaskExecutionResult) -> Result<(), HarvestError> {
            self.sent.lock().unwrap().push((webhook.to_string(), result.clone()));
            Ok(())
        }
    }

    struct Harness {
        scheduler: TaskScheduler,
        crawler: Arc<ScriptedCrawler>,
        notifier: Arc<RecordingNotifier>,
        store: SharedMetadataStore,
    }

    fn harness(max_concurrent_tasks: usize) -> Harness {
        harness_with_store(max_concurrent_tasks, shared(MemoryStore::new()))
    }

    fn harness_with_store(max_concurrent_tasks: usize, store: SharedMetadataStore) -> Harness {
        let crawler = Arc::new(ScriptedCrawler::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = TaskScheduler::new(
            SchedulerConfig {
                max_concurrent_tasks,
                retry_delay: Duration::from_secs(60),
                tick_interval: Duration::from_secs(60),
            },
            crawler.clone(),
            notifier.clone(),
            store.clone(),
        );
        Harness {
            scheduler,
            crawler,
            notifier,
            store,
        }
    }

    fn new_task(url: &str, priority: u8) -> NewTask {
        NewTask {
            priority,
            ..NewTask::new(url, BatchCrawlRequest::new(vec![url.to_string()]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_status_sequence() {
        let h = harness(3);
        let mut events = h.scheduler.subscribe();

        let task = h
            .scheduler
            .create_task(NewTask {
                max_retries: 2,
                ..new_task("https://example.com/fail", 2)
            })
            .unwrap();
        h.scheduler.wait_until_settled().await;

        let mut sequence = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.task_id, task.id);
            sequence.push(event.status);
        }

        use TaskStatus::*;
        assert_eq!(
            sequence,
            vec![Pending, Running, Pending, Running, Pending, Running, Failed]
        );
        assert_eq!(h.crawler.calls().len(), 3);

        let stored = h.scheduler.get_task(&task.id).unwrap();
        assert_eq!(stored.status, Failed);
        assert_eq!(stored.retry_count, 3);

        let history = storage::lock(&h.store).get_executions(&task.id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.error.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_grows_with_retry_count() {
        let h = harness(1);
        let started = tokio::time::Instant::now();

        h.scheduler
            .create_task(NewTask {
                max_retries: 2,
                ..new_task("https://example.com/fail", 2)
            })
            .unwrap();
        h.scheduler.wait_until_settled().await;

        // 60s after the first failure, 120s after the second
        assert!(started.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test]
    async fn test_priority_dispatch_order() {
        let h = harness(1);

        h.scheduler.create_task(new_task("https://example.com/gate", 2)).unwrap();
        for priority in [1, 3, 2] {
            let url = format!("https://example.com/p{}", priority);
            h.scheduler.create_task(new_task(&url, priority)).unwrap();
        }

        assert_eq!(h.scheduler.get_stats().running_tasks, 1);
        h.crawler.gate.add_permits(1);
        h.scheduler.wait_until_settled().await;

        assert_eq!(
            h.crawler.calls(),
            vec![
                "https://example.com/gate",
                "https://example.com/p3",
                "https://example.com/p2",
                "https://example.com/p1",
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let h = harness(2);
        for i in 0..3 {
            h.scheduler
                .create_task(new_task(&format!("https://example.com/gate{}", i), 2))
                .unwrap();
        }
        tokio::task::yield_now().await;

        let stats = h.scheduler.get_stats();
        assert_eq!(stats.running_tasks, 2);
        assert_eq!(stats.pending_tasks, 1);

        h.crawler.gate.add_permits(3);
        h.scheduler.wait_until_settled().await;
        assert_eq!(h.scheduler.get_stats().completed_tasks, 3);
    }

    #[tokio::test]
    async fn test_pause_resume_cancel() {
        let h = harness(1);
        h.scheduler.create_task(new_task("https://example.com/gate", 2)).unwrap();
        let queued = h.scheduler.create_task(new_task("https://example.com/b", 2)).unwrap();

        assert!(h.scheduler.pause_task(&queued.id).unwrap());
        assert!(!h.scheduler.pause_task(&queued.id).unwrap());
        assert_eq!(h.scheduler.get_stats().paused_tasks, 1);

        assert!(h.scheduler.resume_task(&queued.id).unwrap());
        assert!(!h.scheduler.resume_task(&queued.id).unwrap());
        assert_eq!(h.scheduler.get_task(&queued.id).unwrap().status, TaskStatus::Pending);

        assert!(h.scheduler.cancel_task(&queued.id).unwrap());
        assert!(!h.scheduler.cancel_task(&queued.id).unwrap());

        h.crawler.gate.add_permits(1);
        h.scheduler.wait_until_settled().await;

        assert_eq!(h.crawler.calls(), vec!["https://example.com/gate"]);
        assert_eq!(h.scheduler.get_task(&queued.id).unwrap().status, TaskStatus::Cancelled);
        assert!(matches!(
            h.scheduler.pause_task("missing"),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_running_keeps_cancelled() {
        let h = harness(1);
        let task = h.scheduler.create_task(new_task("https://example.com/gate", 2)).unwrap();
        assert_eq!(h.scheduler.get_task(&task.id).unwrap().status, TaskStatus::Running);

        assert!(h.scheduler.cancel_task(&task.id).unwrap());
        h.crawler.gate.add_permits(1);
        h.scheduler.wait_until_settled().await;

        assert_eq!(h.scheduler.get_task(&task.id).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_execute_task() {
        let h = harness(1);
        let task = h
            .scheduler
            .create_task(NewTask {
                enabled: false,
                webhook: Some("https://hooks.example.com/done".to_string()),
                ..new_task("https://example.com/manual", 4)
            })
            .unwrap();
        assert!(h.crawler.calls().is_empty());

        let result = h.scheduler.execute_task(&task.id).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.result.is_some());

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://hooks.example.com/done");
        assert_eq!(sent[0].1.task_id, task.id);

        assert!(matches!(
            h.scheduler.execute_task("missing").await,
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_running_task_is_rejected() {
        let h = harness(1);
        let task = h.scheduler.create_task(new_task("https://example.com/gate", 2)).unwrap();

        assert!(matches!(
            h.scheduler.execute_task(&task.id).await,
            Err(SchedulerError::AlreadyRunning(_))
        ));

        h.crawler.gate.add_permits(1);
        h.scheduler.wait_until_settled().await;
    }

    #[tokio::test]
    async fn test_webhook_receives_failures() {
        let h = harness(1);
        h.scheduler
            .create_task(NewTask {
                max_retries: 0,
                webhook: Some("https://hooks.example.com/".to_string()),
                ..new_task("https://example.com/fail", 2)
            })
            .unwrap();
        h.scheduler.wait_until_settled().await;

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.status, TaskStatus::Failed);
        assert!(sent[0].1.error.as_deref().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn test_invalid_tasks_are_rejected() {
        let h = harness(1);
        let cases = [
            NewTask::new(" ", BatchCrawlRequest::new(vec!["https://example.com/".to_string()])),
            NewTask::new("empty", BatchCrawlRequest::new(Vec::new())),
            NewTask::new("bad", BatchCrawlRequest::new(vec!["ftp://example.com/".to_string()])),
            NewTask {
                webhook: Some("not a url".to_string()),
                ..NewTask::new("hook", BatchCrawlRequest::new(vec!["https://example.com/".to_string()]))
            },
        ];

        for case in cases {
            assert!(matches!(
                h.scheduler.create_task(case),
                Err(SchedulerError::InvalidInput(_))
            ));
        }
        assert_eq!(h.scheduler.get_stats().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_recurring_task_runs_on_tick() {
        let h = harness(1);
        let task = h
            .scheduler
            .create_task(NewTask {
                schedule: Some(Schedule::every(Duration::from_secs(60)).unwrap()),
                ..new_task("https://example.com/recurring", 2)
            })
            .unwrap();
        tokio::task::yield_now().await;
        assert!(h.crawler.calls().is_empty());

        let first_run = task.next_run.unwrap();
        assert_eq!(h.scheduler.tick_at(first_run - chrono::Duration::seconds(1)), 0);
        assert_eq!(h.scheduler.tick_at(first_run), 1);

        let mut events = h.scheduler.subscribe();
        while events.recv().await.unwrap().status != TaskStatus::Completed {}

        let ran = h.scheduler.get_task(&task.id).unwrap();
        assert_eq!(ran.status, TaskStatus::Completed);
        assert_eq!(ran.next_run, Some(first_run + chrono::Duration::seconds(60)));
        assert_eq!(h.scheduler.tick_at(first_run), 0);
        assert_eq!(h.crawler.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_does_not_skip_retry_delay() {
        let h = harness(1);
        let task = h
            .scheduler
            .create_task(NewTask {
                schedule: Some(Schedule::every(Duration::from_secs(60)).unwrap()),
                max_retries: 1,
                ..new_task("https://example.com/fail", 2)
            })
            .unwrap();

        let mut events = h.scheduler.subscribe();
        let first_run = task.next_run.unwrap();
        assert_eq!(h.scheduler.tick_at(first_run), 1);
        while events.recv().await.unwrap().status != TaskStatus::Running {}
        while events.recv().await.unwrap().status != TaskStatus::Pending {}
        assert_eq!(h.scheduler.get_task(&task.id).unwrap().retry_count, 1);

        let next_run = h.scheduler.get_task(&task.id).unwrap().next_run.unwrap();
        let waiting = tokio::time::Instant::now();
        assert_eq!(h.scheduler.tick_at(next_run), 0);
        assert_eq!(h.crawler.calls().len(), 1);
        assert!(h.scheduler.get_task(&task.id).unwrap().next_run.unwrap() > next_run);

        while events.recv().await.unwrap().status != TaskStatus::Failed {}
        assert!(waiting.elapsed() >= Duration::from_secs(60));
        assert_eq!(h.crawler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_paused_recurring_task_is_not_ticked() {
        let h = harness(1);
        let task = h
            .scheduler
            .create_task(NewTask {
                schedule: Some(Schedule::every(Duration::from_secs(60)).unwrap()),
                ..new_task("https://example.com/recurring", 2)
            })
            .unwrap();

        h.scheduler.pause_task(&task.id).unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(h.scheduler.tick_at(later), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_task_keeps_scheduler_unsettled() {
        let h = harness(1);
        let task = h
            .scheduler
            .create_task(NewTask {
                schedule: Some(Schedule::every(Duration::from_secs(60)).unwrap()),
                ..new_task("https://example.com/recurring", 2)
            })
            .unwrap();
        assert!(!h.scheduler.is_settled());

        let mut events = h.scheduler.subscribe();
        h.scheduler.tick_at(task.next_run.unwrap());
        while events.recv().await.unwrap().status != TaskStatus::Completed {}
        assert!(!h.scheduler.is_settled());

        let wait = tokio::time::timeout(Duration::from_secs(600), h.scheduler.wait_until_settled());
        assert!(wait.await.is_err());

        h.scheduler.pause_task(&task.id).unwrap();
        assert!(h.scheduler.is_settled());
        h.scheduler.cancel_task(&task.id).unwrap();
        assert!(h.scheduler.is_settled());
        assert_eq!(h.crawler.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let h = harness(1);
        h.scheduler.create_task(new_task("https://example.com/gate", 2)).unwrap();
        let task = h.scheduler.create_task(new_task("https://example.com/b", 1)).unwrap();

        let updated = h
            .scheduler
            .update_task(
                &task.id,
                TaskUpdate {
                    priority: Some(4),
                    description: Some("docs".to_string()),
                    ..TaskUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.priority, 4);
        assert_eq!(updated.description.as_deref(), Some("docs"));

        assert!(h.scheduler.delete_task(&task.id).unwrap());
        assert!(!h.scheduler.delete_task(&task.id).unwrap());
        assert!(h.scheduler.get_task(&task.id).is_none());
        assert!(storage::lock(&h.store)
            .load_tasks()
            .unwrap()
            .iter()
            .all(|t| t.id != task.id));

        h.crawler.gate.add_permits(1);
        h.scheduler.wait_until_settled().await;
        assert_eq!(h.crawler.calls(), vec!["https://example.com/gate"]);
    }

    #[tokio::test]
    async fn test_load_resets_interrupted_tasks() {
        let mut store = MemoryStore::new();
        let mut interrupted = CrawlTask::from_new(new_task("https://example.com/a", 2));
        interrupted.status = TaskStatus::Running;
        store.save_task(&interrupted).unwrap();

        let mut done = CrawlTask::from_new(new_task("https://example.com/b", 2));
        done.status = TaskStatus::Completed;
        store.save_task(&done).unwrap();

        let h = harness_with_store(2, shared(store));
        assert_eq!(h.scheduler.load_from_store().unwrap(), 2);
        h.scheduler.wait_until_settled().await;

        assert_eq!(h.crawler.calls(), vec!["https://example.com/a"]);
        assert_eq!(
            h.scheduler.get_task(&interrupted.id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let h = harness(2);
        h.scheduler.create_task(new_task("https://example.com/ok", 2)).unwrap();
        h.scheduler
            .create_task(NewTask {
                max_retries: 0,
                ..new_task("https://example.com/fail", 2)
            })
            .unwrap();
        let paused = h
            .scheduler
            .create_task(NewTask {
                enabled: false,
                ..new_task("https://example.com/later", 2)
            })
            .unwrap();
        h.scheduler.pause_task(&paused.id).unwrap();
        h.scheduler.wait_until_settled().await;

        let stats = h.scheduler.get_stats();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.paused_tasks, 1);
        assert_eq!(stats.running_tasks, 0);
        assert_eq!(stats.success_rate, 33.33);
        assert!(stats.average_execution_time >= 0.0);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("successRate").is_some());
    }
}
