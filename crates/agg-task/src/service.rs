use crate::metrics::TaskMetrics;
use crate::task::{Task, TaskState, TaskStatus, TaskUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task owner asked for cancellation; callers must write `Cancelled`
    #[error("task {0} is cancelling")]
    Cancelling(String),
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task service error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn is_cancelling(&self) -> bool {
        matches!(self, TaskError::Cancelling(_))
    }
}

/// Contract between the aggregation engine and the owner of task records
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Push progress; returns `TaskError::Cancelling` once cancellation is requested
    async fn update_task(&self, update: TaskUpdate) -> Result<(), TaskError>;

    /// Create a sub-task under `parent_task_id`, returning its URI
    async fn create_child_task(&self, session_user: &str, parent_task_id: &str) -> Result<String, TaskError>;

    async fn get_task(&self, task_id: &str) -> Result<Task, TaskError>;
}

#[derive(Clone, Debug)]
pub enum TaskEvent {
    Created(String),
    Updated(String, TaskState, u32),
}

/// Task service keeping records in process
#[derive(Clone)]
pub struct InMemoryTaskService {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    metrics: Arc<TaskMetrics>,
    event_sender: broadcast::Sender<TaskEvent>,
}

impl InMemoryTaskService {
    pub fn new(metrics: Arc<TaskMetrics>) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            metrics,
            event_sender: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_sender.subscribe()
    }

    /// Create a top-level task and return its id
    #[instrument(skip(self))]
    pub async fn create_task(&self, session_user: &str) -> String {
        let task = Task::new(session_user, None);
        let id = task.id.clone();
        self.tasks.write().await.insert(id.clone(), task);
        self.metrics.task_created();
        let _ = self.event_sender.send(TaskEvent::Created(id.clone()));
        info!(task_id = %id, "Created task");
        id
    }

    /// Flag a task as cancelling; subsequent non-terminal updates are refused
    pub async fn request_cancel(&self, task_id: &str) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if !task.state.is_terminal() {
            task.state = TaskState::Cancelling;
            info!(task_id = %task_id, "Task cancellation requested");
        }
        Ok(())
    }

    pub fn metrics(&self) -> Arc<TaskMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[async_trait]
impl TaskService for InMemoryTaskService {
    #[instrument(skip(self, update), fields(task_id = %update.task_id, state = %update.state))]
    async fn update_task(&self, update: TaskUpdate) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&update.task_id)
            .ok_or_else(|| TaskError::NotFound(update.task_id.clone()))?;

        if task.state == TaskState::Cancelling && update.state != TaskState::Cancelled {
            self.metrics.cancellation_observed();
            debug!("Refusing update of cancelling task");
            return Err(TaskError::Cancelling(update.task_id));
        }
        if task.state.is_terminal() {
            warn!(current = %task.state, "Ignoring update of finished task");
            return Ok(());
        }

        task.state = update.state;
        task.status = update.status;
        task.percent_complete = update.percent_complete.max(task.percent_complete).min(100);
        if update.state == TaskState::Cancelled {
            task.percent_complete = update.percent_complete.min(100);
        }
        if update.payload.is_some() {
            task.payload = update.payload;
        }
        task.end_time = update.end_time;
        if task.state.is_terminal() {
            self.metrics.task_finished();
        }

        self.metrics.task_updated(&task.state.to_string());
        let _ = self.event_sender.send(TaskEvent::Updated(
            task.id.clone(),
            task.state,
            task.percent_complete,
        ));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_child_task(&self, session_user: &str, parent_task_id: &str) -> Result<String, TaskError> {
        let mut tasks = self.tasks.write().await;
        let parent = tasks
            .get_mut(parent_task_id)
            .ok_or_else(|| TaskError::NotFound(parent_task_id.to_string()))?;

        let child = Task::new(session_user, Some(parent_task_id.to_string()));
        let uri = child.uri();
        parent.child_ids.push(child.id.clone());
        let child_id = child.id.clone();
        tasks.insert(child_id.clone(), child);

        self.metrics.task_created();
        let _ = self.event_sender.send(TaskEvent::Created(child_id));
        Ok(uri)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }
}

/// Task service that accepts every update, for callers without a task
#[derive(Clone, Default)]
pub struct NoopTaskService;

#[async_trait]
impl TaskService for NoopTaskService {
    async fn update_task(&self, _update: TaskUpdate) -> Result<(), TaskError> {
        Ok(())
    }

    async fn create_child_task(&self, _session_user: &str, _parent_task_id: &str) -> Result<String, TaskError> {
        Ok(Task::new("", None).uri())
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, TaskError> {
        Err(TaskError::NotFound(task_id.to_string()))
    }
}

/// Convenience for terminal updates with a status other than OK
pub fn completed(task_id: &str, status: TaskStatus) -> TaskUpdate {
    TaskUpdate::new(task_id, TaskState::Completed, status, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_id_from_uri;

    fn service() -> InMemoryTaskService {
        InMemoryTaskService::new(Arc::new(TaskMetrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let svc = service();
        let id = svc.create_task("admin").await;
        svc.update_task(TaskUpdate::running(&id, 40)).await.unwrap();
        svc.update_task(TaskUpdate::running(&id, 20)).await.unwrap();
        assert_eq!(svc.get_task(&id).await.unwrap().percent_complete, 40);
    }

    #[tokio::test]
    async fn test_cancelling_refuses_updates_until_cancelled() {
        let svc = service();
        let id = svc.create_task("admin").await;
        svc.update_task(TaskUpdate::running(&id, 10)).await.unwrap();
        svc.request_cancel(&id).await.unwrap();

        let err = svc.update_task(TaskUpdate::running(&id, 20)).await.unwrap_err();
        assert!(err.is_cancelling());

        svc.update_task(TaskUpdate::cancelled(&id, 10)).await.unwrap();
        let task = svc.get_task(&id).await.unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
        assert_eq!(svc.metrics().cancellation_count(), 1);
    }

    #[tokio::test]
    async fn test_child_tasks() {
        let svc = service();
        let id = svc.create_task("admin").await;
        let uri = svc.create_child_task("admin", &id).await.unwrap();
        let child_id = task_id_from_uri(&uri);
        let child = svc.get_task(child_id).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(id.as_str()));
        assert_eq!(svc.get_task(&id).await.unwrap().child_ids, vec![child_id.to_string()]);
        assert!(svc.create_child_task("admin", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_events_and_active_gauge() {
        let svc = service();
        let mut rx = svc.subscribe();
        let id = svc.create_task("admin").await;
        assert_eq!(svc.metrics().active_count(), 1);
        svc.update_task(completed(&id, TaskStatus::Warning)).await.unwrap();
        assert_eq!(svc.metrics().active_count(), 0);

        assert!(matches!(rx.recv().await.unwrap(), TaskEvent::Created(_)));
        match rx.recv().await.unwrap() {
            TaskEvent::Updated(_, state, pct) => {
                assert_eq!(state, TaskState::Completed);
                assert_eq!(pct, 100);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
