//! Output module for printing crawl and scheduler reports
//!
//! This module handles:
//! - Summarizing a finished crawl session with its media
//! - Printing scheduler counters and task states

pub mod stats;

pub use stats::{print_scheduler_stats, print_session_report, session_report, SessionReport};
