//! Per-run traversal state and progress reporting

use crate::failure::Failure;
use agg_task::{TaskService, TaskUpdate};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Progress of one task-tracked run.
///
/// Percentages only grow and never exceed 100. When the task service
/// reports that the task is cancelling, a terminal `Cancelled` record is
/// written and every later call to [`Progress::is_cancelled`] returns true.
pub struct Progress {
    tasks: Arc<dyn TaskService>,
    task_id: Option<String>,
    percent: tokio::sync::Mutex<u32>,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new(tasks: Arc<dyn TaskService>, task_id: Option<String>, start: u32) -> Self {
        Self {
            tasks,
            task_id,
            percent: tokio::sync::Mutex::new(start.min(100)),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> u32 {
        *self.percent.lock().await
    }

    /// Add `delta` and push a `Running` record. Returns false once the run
    /// has been cancelled.
    pub async fn advance(&self, delta: u32) -> bool {
        let mut percent = self.percent.lock().await;
        *percent = (*percent + delta).min(100);
        self.push(*percent).await
    }

    /// Raise progress to at least `value` and push it
    pub async fn set_at_least(&self, value: u32) -> bool {
        let mut percent = self.percent.lock().await;
        *percent = (*percent).max(value.min(100));
        self.push(*percent).await
    }

    async fn push(&self, percent: u32) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let Some(task_id) = &self.task_id else {
            return true;
        };
        match self.tasks.update_task(TaskUpdate::running(task_id, percent)).await {
            Ok(()) => true,
            Err(e) if e.is_cancelling() => {
                self.cancelled.store(true, Ordering::SeqCst);
                info!(task_id = %task_id, percent, "Task cancelled, stopping traversal");
                if let Err(e) = self.tasks.update_task(TaskUpdate::cancelled(task_id, percent)).await {
                    debug!(task_id = %task_id, "Failed to write cancelled record: {}", e);
                }
                false
            }
            Err(e) => {
                debug!(task_id = %task_id, "Progress update failed: {}", e);
                true
            }
        }
    }
}

#[derive(Default)]
struct TraversalState {
    visited: HashSet<String>,
    failure: Option<Failure>,
    system_keys: Vec<String>,
}

/// Shared state of one discovery run: visited links, last recorded
/// failure and the root resource keys produced.
pub struct TraversalContext {
    state: Mutex<TraversalState>,
    pub progress: Progress,
}

impl TraversalContext {
    pub fn new(progress: Progress) -> Self {
        Self {
            state: Mutex::new(TraversalState::default()),
            progress,
        }
    }

    fn state(&self) -> MutexGuard<'_, TraversalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `link` visited; false when another branch already claimed it
    pub fn claim(&self, link: &str) -> bool {
        self.state().visited.insert(link.to_string())
    }

    pub fn visited(&self) -> HashSet<String> {
        self.state().visited.clone()
    }

    pub fn is_visited(&self, link: &str) -> bool {
        self.state().visited.contains(link)
    }

    pub fn record(&self, failure: Failure) {
        debug!(status = failure.status_code, "{}", failure.error_message);
        self.state().failure = Some(failure);
    }

    pub fn failure(&self) -> Option<Failure> {
        self.state().failure.clone()
    }

    pub fn clear_failure(&self) {
        self.state().failure = None;
    }

    pub fn add_system_key(&self, key: String) {
        self.state().system_keys.push(key);
    }

    pub fn system_keys(&self) -> Vec<String> {
        self.state().system_keys.clone()
    }
}
