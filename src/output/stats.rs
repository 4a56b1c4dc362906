//! Console reports for crawl sessions and the task scheduler
//!
//! Reports are built as plain structs first so they can be checked in
//! tests, then printed.

use crate::crawler::CrawlSession;
use crate::media::{MediaFileDescriptor, MediaType};
use crate::scheduler::{CrawlTask, SchedulerStats};
use std::collections::BTreeMap;

/// Summary of one finished crawl session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub start_url: String,
    pub status: String,
    pub pages_processed: u32,
    pub error_count: usize,
    pub duration_ms: i64,

    /// Share of attempted pages that succeeded, 0-100
    pub success_rate: f64,
    pub media_files: usize,
    pub media_bytes: u64,
    pub media_by_type: BTreeMap<MediaType, usize>,
    pub errors: Vec<String>,
}

/// Builds the report for a session and the media it collected
pub fn session_report(session: &CrawlSession, media: &[MediaFileDescriptor]) -> SessionReport {
    let attempted = session.pages_processed as usize + session.errors.len();
    let success_rate = if attempted > 0 {
        (session.pages_processed as f64 / attempted as f64) * 100.0
    } else {
        0.0
    };

    let mut media_by_type = BTreeMap::new();
    for file in media {
        *media_by_type.entry(file.media_type).or_insert(0) += 1;
    }

    SessionReport {
        session_id: session.id.clone(),
        start_url: session.start_url.clone(),
        status: session.status.to_string(),
        pages_processed: session.pages_processed,
        error_count: session.errors.len(),
        duration_ms: session.duration().num_milliseconds(),
        success_rate,
        media_files: media.len(),
        media_bytes: media.iter().filter_map(|f| f.size).sum(),
        media_by_type,
        errors: session.errors.clone(),
    }
}

/// Prints a session report to stdout
pub fn print_session_report(report: &SessionReport) {
    println!("=== Crawl Session {} ===\n", report.session_id);

    println!("Overview:");
    println!("  Start URL: {}", report.start_url);
    println!("  Status: {}", report.status);
    println!("  Pages processed: {}", report.pages_processed);
    println!("  Duration: {:.1}s", report.duration_ms as f64 / 1000.0);
    println!();

    if report.media_files > 0 {
        println!("Media ({} files, {} bytes):", report.media_files, report.media_bytes);
        for (media_type, count) in &report.media_by_type {
            println!("  {}: {}", media_type.as_str(), count);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.error_count);
        for error in &report.errors {
            println!("  - {}", error);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} pages successfully processed)",
        report.success_rate,
        report.pages_processed,
        report.pages_processed as usize + report.error_count
    );
}

/// Prints scheduler counters and a line per task to stdout
pub fn print_scheduler_stats(stats: &SchedulerStats, tasks: &[CrawlTask]) {
    println!("=== Scheduler Statistics ===\n");

    println!("Tasks:");
    println!("  Total: {}", stats.total_tasks);
    println!("  Pending: {}", stats.pending_tasks);
    println!("  Running: {}", stats.running_tasks);
    println!("  Completed: {}", stats.completed_tasks);
    println!("  Failed: {}", stats.failed_tasks);
    println!("  Paused: {}", stats.paused_tasks);
    println!("  Cancelled: {}", stats.cancelled_tasks);
    println!();

    if !tasks.is_empty() {
        println!("Task Status:");
        for task in tasks {
            let retries = if task.retry_count > 0 {
                format!(" ({} retries)", task.retry_count)
            } else {
                String::new()
            };
            println!(
                "  [{}] {} - {}{}",
                task.priority, task.name, task.status, retries
            );
        }
        println!();
    }

    println!("Average execution time: {:.2}ms", stats.average_execution_time);
    println!("Success Rate: {:.2}%", stats.success_rate);
}
