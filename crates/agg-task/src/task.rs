use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub const TASK_URI_PREFIX: &str = "/redfish/v1/TaskService/Tasks/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    New,
    Running,
    Completed,
    Exception,
    Cancelling,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Exception | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "OK")]
    Ok,
    Warning,
    Critical,
}

/// Last response recorded on a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub http_headers: HashMap<String, String>,
    pub http_operation: String,
    pub json_body: Value,
    pub target_uri: String,
    pub status_code: u16,
    pub response_body: Value,
}

/// One progress push
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub task_id: String,
    pub state: TaskState,
    pub status: TaskStatus,
    pub percent_complete: u32,
    pub payload: Option<TaskPayload>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn new(task_id: &str, state: TaskState, status: TaskStatus, percent_complete: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            state,
            status,
            percent_complete: percent_complete.min(100),
            payload: None,
            end_time: state.is_terminal().then(Utc::now),
        }
    }

    pub fn running(task_id: &str, percent_complete: u32) -> Self {
        Self::new(task_id, TaskState::Running, TaskStatus::Ok, percent_complete)
    }

    pub fn cancelled(task_id: &str, percent_complete: u32) -> Self {
        Self::new(task_id, TaskState::Cancelled, TaskStatus::Ok, percent_complete)
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Task record kept by the in-process task service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_name: String,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub state: TaskState,
    pub status: TaskStatus,
    pub percent_complete: u32,
    pub payload: Option<TaskPayload>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(user_name: &str, parent_id: Option<String>) -> Self {
        Self {
            id: format!("task{}", uuid::Uuid::new_v4()),
            user_name: user_name.to_string(),
            parent_id,
            child_ids: vec![],
            state: TaskState::New,
            status: TaskStatus::Ok,
            percent_complete: 0,
            payload: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn uri(&self) -> String {
        format!("{}{}", TASK_URI_PREFIX, self.id)
    }
}

/// Task id from a task URI (its last path segment)
pub fn task_id_from_uri(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}
