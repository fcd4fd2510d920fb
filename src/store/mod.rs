//! Storage seam for agents, tasks and task responses
//!
//! The scheduler persists three independent collections keyed by id. The
//! backing engine is external; this trait captures the operations the
//! scheduler needs from it: keyed reads, ordered scans, batch writes,
//! conditional batch updates and delete-by-key. A single call is atomic;
//! nothing is atomic across calls.

pub mod memory;

use crate::model::{Agent, Task, TaskResponse};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;

/// The three persisted collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Agents,
    Tasks,
    Responses,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Agents => write!(f, "agents"),
            Collection::Tasks => write!(f, "tasks"),
            Collection::Responses => write!(f, "task responses"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {id} in {collection}")]
    NotFound { collection: Collection, id: Uuid },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed record store. Scans return records ordered by id.
pub trait Store: Send + Sync {
    fn get_agent(&self, id: &Uuid) -> StoreResult<Agent>;
    fn list_agents(&self) -> StoreResult<Vec<Agent>>;
    fn put_agents(&self, agents: &[Agent]) -> StoreResult<()>;

    /// Apply `update` to each listed agent in one atomic batch.
    ///
    /// Agents for which `update` returns `false` are left untouched; missing
    /// ids are skipped. Returns the agents that were written.
    fn update_agents(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Agent) -> bool,
    ) -> StoreResult<Vec<Agent>>;

    fn get_task(&self, id: &Uuid) -> StoreResult<Task>;
    fn list_tasks(&self) -> StoreResult<Vec<Task>>;
    fn put_tasks(&self, tasks: &[Task]) -> StoreResult<()>;

    /// Conditional batch update of tasks, same contract as [`Store::update_agents`]
    fn update_tasks(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Vec<Task>>;

    fn delete_tasks(&self, ids: &[Uuid]) -> StoreResult<()>;

    fn get_response(&self, id: &Uuid) -> StoreResult<TaskResponse>;
    fn delete_responses(&self, ids: &[Uuid]) -> StoreResult<()>;

    /// Store `response` and apply `link` to the task it references, in one batch.
    ///
    /// When `link` returns `false` nothing is written and `Ok(None)` is
    /// returned. Fails with `NotFound` if the task does not exist.
    fn commit_response(
        &self,
        response: &TaskResponse,
        link: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Option<Task>>;

    fn put_task(&self, task: &Task) -> StoreResult<()> {
        self.put_tasks(std::slice::from_ref(task))
    }

    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.put_agents(std::slice::from_ref(agent))
    }

    /// Update a single agent unconditionally; `NotFound` if it does not exist
    fn update_agent(&self, id: &Uuid, update: &mut dyn FnMut(&mut Agent)) -> StoreResult<Agent> {
        self.update_agents(std::slice::from_ref(id), &mut |agent| {
            update(agent);
            true
        })?
        .into_iter()
        .next()
        .ok_or(StoreError::NotFound {
            collection: Collection::Agents,
            id: *id,
        })
    }
}
