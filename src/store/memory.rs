//! In-process store backed by ordered maps

use super::{Collection, Store, StoreError, StoreResult};
use crate::model::{Agent, Task, TaskResponse};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Collections {
    agents: BTreeMap<Uuid, Agent>,
    tasks: BTreeMap<Uuid, Task>,
    responses: BTreeMap<Uuid, TaskResponse>,
}

/// Ordered key-value store held in memory.
///
/// All three collections sit behind one lock so that every trait call is a
/// single atomic batch. The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn response_count(&self) -> usize {
        self.inner.read().responses.len()
    }
}

fn not_found(collection: Collection, id: &Uuid) -> StoreError {
    StoreError::NotFound {
        collection,
        id: *id,
    }
}

impl Store for MemoryStore {
    fn get_agent(&self, id: &Uuid) -> StoreResult<Agent> {
        self.inner
            .read()
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Collection::Agents, id))
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        Ok(self.inner.read().agents.values().cloned().collect())
    }

    fn put_agents(&self, agents: &[Agent]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for agent in agents {
            inner.agents.insert(agent.id, agent.clone());
        }
        Ok(())
    }

    fn update_agents(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Agent) -> bool,
    ) -> StoreResult<Vec<Agent>> {
        let mut inner = self.inner.write();
        let mut written = Vec::new();
        for id in ids {
            if let Some(stored) = inner.agents.get_mut(id) {
                let mut candidate = stored.clone();
                if update(&mut candidate) {
                    *stored = candidate.clone();
                    written.push(candidate);
                }
            }
        }
        Ok(written)
    }

    fn get_task(&self, id: &Uuid) -> StoreResult<Task> {
        self.inner
            .read()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Collection::Tasks, id))
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.inner.read().tasks.values().cloned().collect())
    }

    fn put_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for task in tasks {
            inner.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    fn update_tasks(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Vec<Task>> {
        let mut inner = self.inner.write();
        let mut written = Vec::new();
        for id in ids {
            if let Some(stored) = inner.tasks.get_mut(id) {
                let mut candidate = stored.clone();
                if update(&mut candidate) {
                    *stored = candidate.clone();
                    written.push(candidate);
                }
            }
        }
        Ok(written)
    }

    fn delete_tasks(&self, ids: &[Uuid]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.tasks.remove(id);
        }
        Ok(())
    }

    fn get_response(&self, id: &Uuid) -> StoreResult<TaskResponse> {
        self.inner
            .read()
            .responses
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Collection::Responses, id))
    }

    fn delete_responses(&self, ids: &[Uuid]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.responses.remove(id);
        }
        Ok(())
    }

    fn commit_response(
        &self,
        response: &TaskResponse,
        link: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Option<Task>> {
        let mut inner = self.inner.write();
        let stored = inner
            .tasks
            .get(&response.task)
            .ok_or_else(|| not_found(Collection::Tasks, &response.task))?;

        let mut candidate = stored.clone();
        if !link(&mut candidate) {
            return Ok(None);
        }

        inner.tasks.insert(candidate.id, candidate.clone());
        inner.responses.insert(response.id, response.clone());
        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecStatus, Labels, TaskBuilder, TaskStatus};

    fn task() -> Task {
        TaskBuilder::new()
            .command("echo x")
            .response_handler("h")
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_records_report_not_found() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_task(&id),
            Err(StoreError::NotFound {
                collection: Collection::Tasks,
                ..
            })
        ));
        assert!(matches!(
            store.get_agent(&id),
            Err(StoreError::NotFound {
                collection: Collection::Agents,
                ..
            })
        ));
        assert!(matches!(
            store.update_agent(&id, &mut |_| {}),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_scans_are_ordered_by_id() {
        let store = MemoryStore::new();
        let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let agents: Vec<Agent> = ids.iter().rev().map(|id| Agent::new(*id)).collect();
        store.put_agents(&agents).unwrap();

        ids.sort();
        let listed: Vec<Uuid> = store.list_agents().unwrap().iter().map(|a| a.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_conditional_update_only_writes_accepted_records() {
        let store = MemoryStore::new();
        let first = task();
        let mut second = task();
        second.status = TaskStatus::Done;
        store.put_tasks(&[first.clone(), second.clone()]).unwrap();

        let written = store
            .update_tasks(&[first.id, second.id, Uuid::new_v4()], &mut |t| {
                if t.status != TaskStatus::Ready {
                    return false;
                }
                t.status = TaskStatus::Assigned;
                true
            })
            .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(store.get_task(&first.id).unwrap().status, TaskStatus::Assigned);
        assert_eq!(store.get_task(&second.id).unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn test_commit_response_writes_pair_or_nothing() {
        let store = MemoryStore::new();
        let task = task();
        store.put_task(&task).unwrap();

        let response =
            TaskResponse::for_task(&task, "out".to_string(), ExecStatus::Success, Labels::new());

        let rejected = store.commit_response(&response, &mut |_| false).unwrap();
        assert!(rejected.is_none());
        assert_eq!(store.response_count(), 0);

        let linked = store
            .commit_response(&response, &mut |t| {
                t.task_response = Some(response.id);
                true
            })
            .unwrap()
            .unwrap();
        assert_eq!(linked.task_response, Some(response.id));
        assert_eq!(store.get_response(&response.id).unwrap().task, task.id);
    }

    #[test]
    fn test_commit_response_for_unknown_task_fails() {
        let store = MemoryStore::new();
        let orphan = task();
        let response =
            TaskResponse::for_task(&orphan, String::new(), ExecStatus::Error, Labels::new());
        assert!(matches!(
            store.commit_response(&response, &mut |_| true),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.response_count(), 0);
    }

    #[test]
    fn test_deletes_are_idempotent() {
        let store = MemoryStore::new();
        let task = task();
        store.put_task(&task).unwrap();
        store.delete_tasks(&[task.id]).unwrap();
        store.delete_tasks(&[task.id]).unwrap();
        assert_eq!(store.task_count(), 0);
    }
}
