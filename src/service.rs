//! Task intake and read-back for collaborators
//!
//! Producers of work (grading services, CI front ends) only ever create tasks
//! and read task, response and agent records back. They never touch the
//! lifecycle directly.

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Agent, Labels, Task, TaskBuilder, TaskResponse};
use crate::observability::MetricsCollector;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// Offset/limit window over an id-ordered scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    fn apply<T>(&self, items: Vec<T>) -> Paged<T> {
        let total = items.len();
        let limit = self.effective_limit();
        Paged {
            items: items.into_iter().skip(self.offset).take(limit).collect(),
            total,
            offset: self.offset,
            limit,
        }
    }
}

/// One page of records plus the size of the full collection
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Body of a task creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub response_handler: String,
    #[serde(default)]
    pub exec_timeout: i64,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub agent: Option<Uuid>,
    #[serde(default)]
    pub labels: Labels,
}

impl NewTask {
    pub fn into_builder(self) -> TaskBuilder {
        let builder = TaskBuilder::new()
            .os_type(self.os_type)
            .architecture(self.architecture)
            .command(self.command)
            .response_handler(self.response_handler)
            .exec_timeout(self.exec_timeout)
            .dependencies(self.dependencies)
            .labels(self.labels);

        match self.agent {
            Some(agent_id) => builder.agent(agent_id),
            None => builder,
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }

    /// Validate and persist a new `Ready` task
    pub fn create_task(&self, builder: TaskBuilder) -> SchedulerResult<Task> {
        let task = builder.build_and_store(self.store.as_ref())?;
        self.metrics.task_created();
        info!(
            task_id = %task.id,
            os_type = %task.os_type,
            architecture = %task.architecture,
            handler = %task.response_handler,
            "Task created"
        );
        Ok(task)
    }

    pub fn submit(&self, request: NewTask) -> SchedulerResult<Task> {
        self.create_task(request.into_builder())
    }

    pub fn get_task(&self, id: &Uuid) -> SchedulerResult<Task> {
        Ok(self.store.get_task(id)?)
    }

    /// The response linked to task `id`; `ResponsePending` until the agent has answered
    pub fn get_task_response(&self, id: &Uuid) -> SchedulerResult<TaskResponse> {
        let task = self.store.get_task(id)?;
        let response_id = task
            .task_response
            .ok_or(SchedulerError::ResponsePending { task_id: *id })?;
        Ok(self.store.get_response(&response_id)?)
    }

    pub fn get_response(&self, response_id: &Uuid) -> SchedulerResult<TaskResponse> {
        Ok(self.store.get_response(response_id)?)
    }

    pub fn list_tasks(&self, page: Page) -> SchedulerResult<Paged<Task>> {
        Ok(page.apply(self.store.list_tasks()?))
    }

    pub fn list_agents(&self, page: Page) -> SchedulerResult<Paged<Agent>> {
        Ok(page.apply(self.store.list_agents()?))
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecStatus, TaskStatus};
    use crate::store::MemoryStore;

    fn service() -> (TaskService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = TaskService::new(store.clone(), Arc::new(MetricsCollector::new()));
        (service, store)
    }

    fn request() -> NewTask {
        NewTask {
            command: "cargo test".to_string(),
            response_handler: "echo".to_string(),
            exec_timeout: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_submit_persists_ready_task() {
        let (service, store) = service();
        let task = service.submit(request()).unwrap();

        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(store.get_task(&task.id).unwrap(), task);
        assert_eq!(service.metrics.snapshot().tasks.created, 1);
    }

    #[test]
    fn test_invalid_request_stores_nothing() {
        let (service, store) = service();
        let err = service
            .submit(NewTask {
                exec_timeout: -5,
                ..request()
            })
            .unwrap_err();

        assert!(matches!(err, SchedulerError::InsufficientData { .. }));
        assert_eq!(store.task_count(), 0);
    }

    #[test]
    fn test_response_not_found_before_result() {
        let (service, _) = service();
        let task = service.submit(request()).unwrap();
        let err = service.get_task_response(&task.id).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("task {} has no response yet", task.id));
    }

    #[test]
    fn test_response_follows_link() {
        let (service, store) = service();
        let task = service.submit(request()).unwrap();
        let response =
            TaskResponse::for_task(&task, "ok".to_string(), ExecStatus::Success, Labels::new());
        store
            .commit_response(&response, &mut |t| {
                t.task_response = Some(response.id);
                true
            })
            .unwrap();

        assert_eq!(service.get_task_response(&task.id).unwrap(), response);
        assert_eq!(service.get_response(&response.id).unwrap(), response);
    }

    #[test]
    fn test_paging() {
        let (service, _) = service();
        for _ in 0..7 {
            service.submit(request()).unwrap();
        }

        let page = service.list_tasks(Page::new(5, 50)).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.items.len(), 2);

        let capped = service.list_tasks(Page::new(0, 10_000)).unwrap();
        assert_eq!(capped.limit, MAX_PAGE_LIMIT);

        let zero = service.list_tasks(Page::new(0, 0)).unwrap();
        assert_eq!(zero.items.len(), 1);
    }
}
