//! State module for tracking session and task life cycles
//!
//! # Components
//!
//! - `SessionStatus`: running, completed, failed or stopped crawl sessions
//! - `TaskStatus`: scheduler task states, which drive run-queue membership
//! - `TaskPriority`: named priority levels for scheduled tasks

mod session_state;
mod task_state;

// Re-export main types
pub use session_state::SessionStatus;
pub use task_state::{TaskPriority, TaskStatus};
