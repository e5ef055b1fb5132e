//! Run control - abort flag and the stack of currently executing tasks
//!
//! Shared between the pipeline thread and the control server. The active
//! stack holds one entry per nesting level, so the top is the innermost
//! running task.

use super::{Task, TaskInfo};
use crate::error::TaskError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct RunControl {
    aborted: AtomicBool,
    active: Mutex<Vec<Arc<dyn Task>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort: the flag stops further tasks from starting and every
    /// running task is asked to stop
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            log::warn!("Abort requested");
        }
        let running: Vec<Arc<dyn Task>> = self.active.lock().iter().rev().cloned().collect();
        for task in running {
            log::info!("Aborting task {}", task.name());
            task.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// `Err(Aborted)` once an abort has been requested
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_aborted() {
            Err(TaskError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Mark `task` as running until the guard drops
    pub fn enter(&self, task: Arc<dyn Task>) -> ActiveGuard<'_> {
        self.active.lock().push(task);
        ActiveGuard { control: self }
    }

    /// Name of the innermost running task, empty when idle
    pub fn active_worker(&self) -> String {
        self.active
            .lock()
            .last()
            .map(|task| task.name().to_string())
            .unwrap_or_default()
    }

    /// Info of the innermost running task, empty when idle
    pub fn worker_info(&self) -> TaskInfo {
        let top = self.active.lock().last().cloned();
        top.map(|task| task.info()).unwrap_or_default()
    }

    /// Nesting depth of running tasks
    pub fn depth(&self) -> usize {
        self.active.lock().len()
    }
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("aborted", &self.is_aborted())
            .field("active_worker", &self.active_worker())
            .finish()
    }
}

/// Pops the task pushed by [`RunControl::enter`]
pub struct ActiveGuard<'a> {
    control: &'a RunControl,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.control.active.lock().pop();
    }
}
