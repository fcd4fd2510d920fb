//! Handlers for frames agents send to the scheduler

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Agent, AgentStatus, Task, TaskResponse, TaskStatus};
use crate::observability::MetricsCollector;
use crate::protocol::{Frame, Heartbeat, HeartbeatAck, TaskResult, TaskResultBatch};
use crate::scheduler::dispatch::DispatchEngine;
use crate::store::{Store, StoreError};
use crate::transport::{Endpoint, InboundHandler, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Refreshes the agent record and acknowledges each heartbeat
pub struct HeartbeatHandler {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
}

impl HeartbeatHandler {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl InboundHandler for HeartbeatHandler {
    async fn handle(&self, endpoint: Arc<Endpoint>, frame: Frame) -> SchedulerResult<()> {
        self.metrics.frame_received();
        let heartbeat: Heartbeat = frame.parse().map_err(TransportError::Serialization)?;
        let agent_id = endpoint.agent_id();
        let now = Utc::now();

        let user = if heartbeat.user.is_empty() {
            endpoint.user().to_string()
        } else {
            heartbeat.user.clone()
        };
        let mut refresh = |agent: &mut Agent| {
            agent.user = user.clone();
            agent.hostname = heartbeat.hostname.clone();
            agent.ip = heartbeat.ip.clone();
            agent.os_type = heartbeat.os_type.clone();
            agent.architecture = heartbeat.architecture.clone();
            agent.status = AgentStatus::Up;
            agent.last_keepalive = now;
        };

        let updated = self.store.update_agent(&agent_id, &mut refresh);
        match updated {
            Ok(agent) => debug!(%agent_id, load = agent.num_running_tasks, "Heartbeat"),
            Err(StoreError::NotFound { .. }) => {
                let mut agent = Agent::new(agent_id);
                refresh(&mut agent);
                self.store.put_agent(&agent)?;
                info!(
                    %agent_id,
                    hostname = %agent.hostname,
                    os_type = %agent.os_type,
                    architecture = %agent.architecture,
                    "Registered new agent"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.metrics.heartbeat_received();
        endpoint.write(&HeartbeatAck { timestamp: now }).await?;
        Ok(())
    }
}

/// Stores agent results and moves their tasks to `Done`
pub struct TaskResultHandler {
    store: Arc<dyn Store>,
    dispatcher: Arc<DispatchEngine>,
    metrics: Arc<MetricsCollector>,
}

impl TaskResultHandler {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<DispatchEngine>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
        }
    }

    /// Write the response and link it to its task in one batch.
    ///
    /// Rejected when the task is not in progress, belongs to another agent,
    /// or already has a response.
    fn accept(&self, agent_id: Uuid, result: TaskResult) -> SchedulerResult<Task> {
        let task_id = result.task_id;
        let task = self.store.get_task(&task_id)?;
        let response = TaskResponse::for_task(&task, result.payload, result.exec_status, result.labels);
        let response_id = response.id;

        let mut rejection = None;
        let linked = self.store.commit_response(&response, &mut |task| {
            let reason = if task.status != TaskStatus::InProgress {
                Some(format!("task is {}", task.status))
            } else if task.agent != Some(agent_id) {
                Some("task is assigned to another agent".to_string())
            } else if task.task_response.is_some() {
                Some("task already has a response".to_string())
            } else {
                None
            };
            if let Some(reason) = reason {
                rejection = Some(reason);
                return false;
            }

            task.task_response = Some(response_id);
            task.transition(TaskStatus::Done).is_ok()
        })?;

        linked.ok_or_else(|| {
            SchedulerError::result_rejected(
                task_id,
                rejection.unwrap_or_else(|| "task cannot move to done".to_string()),
            )
        })
    }
}

#[async_trait]
impl InboundHandler for TaskResultHandler {
    async fn handle(&self, endpoint: Arc<Endpoint>, frame: Frame) -> SchedulerResult<()> {
        self.metrics.frame_received();
        let batch: TaskResultBatch = frame.parse().map_err(TransportError::Serialization)?;
        let agent_id = endpoint.agent_id();

        for result in batch.results {
            let task_id = result.task_id;
            let exec_status = result.exec_status;

            match self.accept(agent_id, result) {
                Ok(_) => {
                    self.metrics.result_accepted();
                    if let Err(e) = self.dispatcher.release(&agent_id) {
                        warn!(%agent_id, error = %e, "Failed to release agent load");
                    }
                    info!(%task_id, %agent_id, ?exec_status, "Result accepted");
                }
                Err(e) => {
                    self.metrics.result_ignored();
                    warn!(%task_id, %agent_id, error = %e, "Ignoring task result");
                }
            }
        }

        Ok(())
    }
}
