//! Task descriptor, lifecycle state machine and builder

use super::Labels;
use crate::error::{sanitize_description, SchedulerError, SchedulerResult};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Execution budgets are clamped to ten years when computing deadlines
const MAX_EXEC_TIMEOUT_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Lifecycle status of a task.
///
/// ```text
/// Ready -> Assigned -> InProgress -> Done -> Assigned -> Processing -> Ok | Error
///                         \-> Timeout
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ready,
    Assigned,
    InProgress,
    Done,
    Processing,
    Ok,
    Error,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Ok | TaskStatus::Error | TaskStatus::Timeout)
    }

    /// Statuses the pipeline picks up and claims
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Done)
    }

    /// Forward transitions allowed by the lifecycle
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Ready, Assigned)
                | (Done, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Processing)
                | (Assigned, Error)
                | (InProgress, Done)
                | (InProgress, Timeout)
                | (Processing, Ok)
                | (Processing, Error)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Ready => "ready",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Processing => "processing",
            TaskStatus::Ok => "ok",
            TaskStatus::Error => "error",
            TaskStatus::Timeout => "timeout",
        };
        write!(f, "{name}")
    }
}

/// A unit of dispatchable work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    /// Required OS type; empty matches any agent
    pub os_type: String,
    /// Required architecture; empty matches any agent
    pub architecture: String,
    pub command: String,
    pub response_handler: String,
    /// Seconds the agent is given before the task is timed out (plus grace)
    pub exec_timeout: u64,
    pub dependencies: BTreeSet<String>,
    pub status: TaskStatus,
    pub description: String,
    pub agent: Option<Uuid>,
    pub task_response: Option<Uuid>,
    pub labels: Labels,
    /// Status held when the pipeline claimed the task, cleared once it moves on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_from: Option<TaskStatus>,
    /// Token of the worker holding the claim, kept until the task leaves the
    /// worker's hands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn transition(&mut self, next: TaskStatus) -> SchedulerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        if next == TaskStatus::Assigned {
            self.claimed_from = Some(self.status);
        } else {
            self.claimed_from = None;
        }
        if next != TaskStatus::Processing {
            self.claim_id = None;
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Claim a `Ready` or `Done` task for the worker holding `claim_id`
    pub fn claim(&mut self, claim_id: Uuid) -> SchedulerResult<()> {
        self.transition(TaskStatus::Assigned)?;
        self.claim_id = Some(claim_id);
        Ok(())
    }

    /// Whether the worker holding `claim_id` still owns this task in `status`
    pub fn is_claimed_by(&self, claim_id: Option<Uuid>, status: TaskStatus) -> bool {
        claim_id.is_some() && self.claim_id == claim_id && self.status == status
    }

    /// Terminate in `Error` with a sanitized description
    pub fn fail(&mut self, description: &str) -> SchedulerResult<()> {
        self.transition(TaskStatus::Error)?;
        self.description = sanitize_description(description);
        Ok(())
    }

    /// Terminate in `Ok` with a sanitized success summary
    pub fn succeed(&mut self, description: &str) -> SchedulerResult<()> {
        self.transition(TaskStatus::Ok)?;
        self.description = sanitize_description(description);
        Ok(())
    }

    /// Put an abandoned claim back to the status it was claimed from
    pub fn release_claim(&mut self) {
        self.status = self.claimed_from.take().unwrap_or(TaskStatus::Ready);
        self.claim_id = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Time since the last update
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
    }

    /// Whether an in-progress task has exceeded its execution budget plus `grace`
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let budget = Duration::seconds(self.exec_timeout.min(MAX_EXEC_TIMEOUT_SECS) as i64);
        self.status == TaskStatus::InProgress && self.idle_for(now) > budget + grace
    }
}

/// Fluent, validated construction of tasks
#[derive(Debug, Clone, Default)]
pub struct TaskBuilder {
    os_type: String,
    architecture: String,
    command: String,
    response_handler: String,
    exec_timeout: i64,
    dependencies: BTreeSet<String>,
    agent: Option<Uuid>,
    labels: Labels,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    pub fn architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = architecture.into();
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn response_handler(mut self, handler: impl Into<String>) -> Self {
        self.response_handler = handler.into();
        self
    }

    pub fn exec_timeout(mut self, seconds: i64) -> Self {
        self.exec_timeout = seconds;
        self
    }

    pub fn dependencies<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Pre-assign the task to a specific agent, bypassing agent selection
    pub fn agent(mut self, agent_id: Uuid) -> Self {
        self.agent = Some(agent_id);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Validate and produce a `Ready` task without persisting it
    pub fn build(self) -> SchedulerResult<Task> {
        if self.command.is_empty() {
            return Err(SchedulerError::insufficient_data("command is empty"));
        }
        if self.response_handler.is_empty() {
            return Err(SchedulerError::insufficient_data("response handler is empty"));
        }
        let exec_timeout = u64::try_from(self.exec_timeout).map_err(|_| {
            SchedulerError::insufficient_data(format!(
                "exec timeout must be >= 0, got {}",
                self.exec_timeout
            ))
        })?;

        let now = Utc::now();
        Ok(Task {
            id: Uuid::new_v4(),
            os_type: self.os_type,
            architecture: self.architecture,
            command: self.command,
            response_handler: self.response_handler,
            exec_timeout,
            dependencies: self.dependencies,
            status: TaskStatus::Ready,
            description: String::new(),
            agent: self.agent,
            task_response: None,
            labels: self.labels,
            claimed_from: None,
            claim_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validate, then persist the task in one write. Nothing is stored on failure.
    pub fn build_and_store(self, store: &dyn Store) -> SchedulerResult<Task> {
        let task = self.build()?;
        store.put_tasks(std::slice::from_ref(&task))?;
        Ok(task)
    }
}
