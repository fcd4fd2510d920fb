//! Agent selection: capability match, then least loaded

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Agent, Task};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Picks an agent for a task and keeps the agents' load counters.
///
/// The counter is advisory: it is incremented when a task is handed to an
/// agent and decremented once the task leaves `InProgress`.
pub struct DispatchEngine {
    store: Arc<dyn Store>,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Choose the least loaded live agent matching the task's filters and
    /// charge it with one running task.
    ///
    /// Ties go to the agent seen first in scan order. A candidate that went
    /// down between the scan and the increment is skipped.
    pub fn select_agent(&self, task: &Task) -> SchedulerResult<Uuid> {
        let mut candidates: Vec<(usize, Agent)> = self
            .store
            .list_agents()?
            .into_iter()
            .filter(|agent| agent.is_up() && agent.accepts(&task.os_type, &task.architecture))
            .enumerate()
            .collect();

        candidates.sort_by_key(|(scan_order, agent)| (agent.num_running_tasks, *scan_order));

        for (_, candidate) in candidates {
            let charged = self.store.update_agents(&[candidate.id], &mut |agent| {
                if !agent.is_up() {
                    return false;
                }
                agent.num_running_tasks = agent.num_running_tasks.saturating_add(1);
                true
            })?;

            if let Some(agent) = charged.into_iter().next() {
                info!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    load = agent.num_running_tasks,
                    "Selected agent"
                );
                return Ok(agent.id);
            }
            debug!(agent_id = %candidate.id, "Candidate went down before selection");
        }

        Err(SchedulerError::no_eligible_agents(
            &task.os_type,
            &task.architecture,
        ))
    }

    /// Charge a pre-assigned agent with one running task
    pub fn reserve(&self, agent_id: &Uuid) -> SchedulerResult<()> {
        self.store
            .update_agent(agent_id, &mut |agent| {
                agent.num_running_tasks = agent.num_running_tasks.saturating_add(1);
            })
            .map(|_| ())
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SchedulerError::AgentUnavailable {
                    agent_id: *agent_id,
                },
                other => other.into(),
            })
    }

    /// Give back one unit of load. Unknown agents are ignored.
    pub fn release(&self, agent_id: &Uuid) -> SchedulerResult<()> {
        let released = self.store.update_agents(&[*agent_id], &mut |agent| {
            if agent.num_running_tasks == 0 {
                return false;
            }
            agent.num_running_tasks -= 1;
            true
        })?;

        if let Some(agent) = released.first() {
            debug!(agent_id = %agent.id, load = agent.num_running_tasks, "Released agent load");
        }
        Ok(())
    }
}
