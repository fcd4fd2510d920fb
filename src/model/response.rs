//! Task response descriptor

use super::{Labels, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution outcome as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Success,
    Error,
}

/// The agent's answer to a task. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResponse {
    pub id: Uuid,
    pub payload: String,
    /// Echo of the task's response handler name
    pub handler: String,
    pub task: Uuid,
    pub exec_status: ExecStatus,
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
}

impl TaskResponse {
    /// Build the response for `task`. Result labels are overlaid on the task's own labels.
    pub fn for_task(task: &Task, payload: String, exec_status: ExecStatus, labels: Labels) -> Self {
        let mut merged = task.labels.clone();
        merged.extend(labels);

        Self {
            id: Uuid::new_v4(),
            payload,
            handler: task.response_handler.clone(),
            task: task.id,
            exec_status,
            labels: merged,
            created_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.exec_status == ExecStatus::Error
    }
}
