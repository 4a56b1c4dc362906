//! Run queue of pending tasks

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// A pending task waiting for a dispatch slot
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub priority: u8,

    /// Insertion order, for FIFO within one priority
    pub sequence: u64,
}

// Higher priority pops first; equal priorities pop in insertion order
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

/// Priority queue holding each task at most once
#[derive(Debug, Default)]
pub struct RunQueue {
    heap: BinaryHeap<QueuedTask>,
    members: HashSet<String>,
    next_sequence: u64,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task unless it is already queued
    ///
    /// # Returns
    ///
    /// `true` if the task was added
    pub fn push(&mut self, task_id: &str, priority: u8) -> bool {
        if !self.members.insert(task_id.to_string()) {
            return false;
        }

        self.heap.push(QueuedTask {
            task_id: task_id.to_string(),
            priority,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        true
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        let next = self.heap.pop()?;
        self.members.remove(&next.task_id);
        Some(next)
    }

    /// Removes a task from the queue
    ///
    /// # Returns
    ///
    /// `true` if the task was queued
    pub fn remove(&mut self, task_id: &str) -> bool {
        if !self.members.remove(task_id) {
            return false;
        }
        self.heap.retain(|queued| queued.task_id != task_id);
        true
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.members.contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
