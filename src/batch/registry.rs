//! Task registry for one batch.
//!
//! Holds `(key, unit of work)` pairs in insertion order and rejects empty or
//! repeated keys. The executor consumes the registry when the run starts, so
//! nothing can be added once execution is under way.

use std::collections::HashSet;

use crate::batch::types::{Task, TaskKey};
use crate::{BatchError, Result};

/// Insertion-ordered set of tasks with O(1) duplicate detection
#[derive(Debug)]
pub struct TaskRegistry<W> {
    tasks: Vec<Task<W>>,
    keys: HashSet<TaskKey>,
}

impl<W> TaskRegistry<W> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Append a task, failing on an empty or already registered key
    pub fn insert(&mut self, key: impl Into<TaskKey>, work: W) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(BatchError::InvalidKey);
        }
        if !self.keys.insert(key.clone()) {
            return Err(BatchError::DuplicateKey(key));
        }

        self.tasks.push(Task { key, work });
        Ok(())
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|task| task.key.as_str())
    }

    /// Consume the registry, yielding tasks in registration order
    pub fn into_tasks(self) -> Vec<Task<W>> {
        self.tasks
    }
}

impl<W> Default for TaskRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}
