//! Windowed fan-out of one action across many targets
//!
//! Units are dispatched in windows of `batch_size` with a delay between
//! windows; a batch size of 0 dispatches every unit at once. Each unit
//! reports one HTTP-style status through a queue sized to the number of
//! targets, and the drain loop turns the count of finished units into task
//! progress.

use crate::traversal::Progress;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Index ranges dispatched together
pub fn dispatch_windows(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![];
    }
    if batch_size == 0 {
        return vec![0..len];
    }
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 200 when every unit succeeded, else the highest status observed
    pub status_code: u16,
    pub total: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Run `action` once per target and collect the statuses.
///
/// Cancellation seen while draining stops progress pushes; units already
/// dispatched still run to completion and no further window is started.
pub async fn run_batched<T, F, Fut>(
    targets: Vec<T>,
    batch_size: usize,
    delay: Duration,
    progress: &Progress,
    action: F,
) -> BatchOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = u16> + Send + 'static,
{
    let total = targets.len();
    let (tx, mut rx) = mpsc::channel::<u16>(total.max(1));
    let windows = dispatch_windows(total, batch_size);
    let window_count = windows.len();
    let mut targets = targets.into_iter();

    let dispatcher = async {
        for (n, window) in windows.into_iter().enumerate() {
            if progress.is_cancelled() {
                info!(window = n, "Batch cancelled before dispatching remaining windows");
                break;
            }
            debug!(window = n, size = window.len(), "Dispatching batch window");
            for target in targets.by_ref().take(window.len()) {
                let tx = tx.clone();
                let unit = action(target);
                tokio::spawn(async move {
                    let status = unit.await;
                    let _ = tx.send(status).await;
                });
            }
            if n + 1 < window_count && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        drop(tx);
    };

    let drain = async {
        let mut outcome = BatchOutcome {
            status_code: 200,
            total,
            failed: 0,
            cancelled: false,
        };
        let mut done = 0usize;
        while let Some(status) = rx.recv().await {
            done += 1;
            if !(200..300).contains(&status) {
                warn!(status, "Batch unit failed");
                outcome.failed += 1;
                outcome.status_code = if outcome.failed == 1 {
                    status
                } else {
                    outcome.status_code.max(status)
                };
            }
            if !outcome.cancelled {
                let percent = (done * 100 / total.max(1)) as u32;
                if !progress.set_at_least(percent).await {
                    outcome.cancelled = true;
                }
            }
        }
        outcome
    };

    let ((), outcome) = tokio::join!(dispatcher, drain);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use agg_task::{InMemoryTaskService, NoopTaskService, TaskMetrics, TaskService, TaskState};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn untracked() -> Progress {
        Progress::new(Arc::new(NoopTaskService), None, 0)
    }

    #[test]
    fn test_dispatch_windows() {
        assert_eq!(dispatch_windows(5, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(dispatch_windows(5, 0), vec![0..5]);
        assert_eq!(dispatch_windows(3, 10), vec![0..3]);
        assert!(dispatch_windows(0, 2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_spaced_by_delay() {
        let start = Instant::now();
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let progress = untracked();
        let outcome = run_batched((0..5).collect(), 2, Duration::from_secs(10), &progress, |i: usize| {
            dispatched.lock().unwrap().push((i, start.elapsed()));
            async { 200 }
        })
        .await;

        assert!(outcome.is_success());
        let dispatched = dispatched.lock().unwrap().clone();
        assert_eq!(dispatched.len(), 5);
        for (m, elapsed) in dispatched {
            assert!(elapsed >= Duration::from_secs(10 * (m as u64 / 2)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_batch_size_dispatches_everything_at_once() {
        let start = Instant::now();
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let progress = untracked();
        run_batched((0..4).collect(), 0, Duration::from_secs(30), &progress, |i: usize| {
            dispatched.lock().unwrap().push((i, start.elapsed()));
            async { 200 }
        })
        .await;
        assert!(dispatched
            .lock()
            .unwrap()
            .iter()
            .all(|(_, elapsed)| *elapsed < Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_partial_failure_surfaces_highest_status() {
        let progress = untracked();
        let outcome = run_batched(vec![200u16, 503, 200], 0, Duration::ZERO, &progress, |status| async move {
            status
        })
        .await;
        assert_eq!(outcome.status_code, 503);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.total, 3);

        let outcome = run_batched(vec![404u16, 500, 401], 0, Duration::ZERO, &progress, |status| async move {
            status
        })
        .await;
        assert_eq!(outcome.status_code, 500);
    }

    #[tokio::test]
    async fn test_progress_reaches_100() {
        let tasks = Arc::new(InMemoryTaskService::new(Arc::new(TaskMetrics::new().unwrap())));
        let id = tasks.create_task("admin").await;
        let progress = Progress::new(tasks.clone(), Some(id.clone()), 0);
        run_batched(vec![1, 2, 3, 4], 2, Duration::ZERO, &progress, |_| async { 200 }).await;
        let task = tasks.get_task(&id).await.unwrap();
        assert_eq!(task.percent_complete, 100);
        assert_eq!(task.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_cancellation_stops_progress_but_collects_results() {
        let tasks = Arc::new(InMemoryTaskService::new(Arc::new(TaskMetrics::new().unwrap())));
        let id = tasks.create_task("admin").await;
        tasks.update_task(agg_task::TaskUpdate::running(&id, 1)).await.unwrap();
        tasks.request_cancel(&id).await.unwrap();
        let progress = Progress::new(tasks.clone(), Some(id.clone()), 0);

        let outcome = run_batched(vec![200u16, 200, 200], 0, Duration::ZERO, &progress, |s| async move { s }).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.failed, 0);
        assert_eq!(tasks.get_task(&id).await.unwrap().state, TaskState::Cancelled);
    }
}
