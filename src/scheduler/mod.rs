//! Task scheduling for batch crawls
//!
//! # Components
//!
//! - `Schedule`: fixed-interval recurrence of a task
//! - `CrawlTask` / `NewTask` / `TaskUpdate`: task records and their inputs
//! - `BatchCrawlRequest` and `BatchCrawler`: a task's payload and the
//!   collaborator that executes it (`SessionBatchCrawler` by default)
//! - `TaskNotifier`: webhook delivery of execution results
//! - `TaskScheduler`: run queue, dispatch, retries and recurring ticks

mod batch;
mod notifier;
mod queue;
mod runner;
mod schedule;
mod task;

pub use batch::{
    quality_score, BatchCrawlRequest, BatchCrawlResult, BatchCrawler, BatchOptions,
    SessionBatchCrawler, UrlCrawlResult,
};
pub use notifier::{NoopNotifier, TaskNotifier, WebhookNotifier, WEBHOOK_TIMEOUT};
pub use queue::{QueuedTask, RunQueue};
pub use runner::{SchedulerConfig, SchedulerError, SchedulerStats, TaskEvent, TaskScheduler};
pub use schedule::{Schedule, ScheduleError};
pub use task::{CrawlTask, NewTask, TaskExecutionResult, TaskUpdate, DEFAULT_MAX_RETRIES};
