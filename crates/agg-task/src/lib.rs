//! Aggregation Task - progress contract for long-running operations
//!
//! The aggregation engine never owns task records; it pushes
//! `(task, state, status, percent, payload)` updates through
//! [`TaskService`] and reacts to the distinguished
//! [`TaskError::Cancelling`] outcome by writing a terminal `Cancelled`
//! record.

pub mod metrics;
pub mod service;
pub mod task;

pub use metrics::TaskMetrics;
pub use service::{completed, InMemoryTaskService, NoopTaskService, TaskError, TaskEvent, TaskService};
pub use task::{task_id_from_uri, Task, TaskPayload, TaskState, TaskStatus, TaskUpdate, TASK_URI_PREFIX};
