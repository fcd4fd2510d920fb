//! Periodic sweep that advances tasks through their lifecycle
//!
//! Each sweep scans every task once and sorts it into one of four buckets:
//!
//! - `Ready`/`Done` tasks are claimed by workers and advanced one step
//! - `InProgress` tasks past `exec_timeout + grace` become `Timeout`
//! - finished tasks older than the retention window are deleted with their
//!   response
//! - `Assigned` tasks whose worker vanished are released back to the status
//!   they were claimed from
//!
//! Every unit of work runs on its own spawned task; the sweep itself only
//! classifies and spawns. Workers claim their chunk with a single conditional
//! batch update that stamps a claim token on each task. Every later write for
//! that task is conditional on the token, so a worker whose claim was
//! recovered and handed to another sweep drops the task instead of
//! processing it a second time.

use crate::config::PipelineSection;
use crate::error::{SchedulerError, SchedulerResult};
use crate::handlers::HandlerRegistry;
use crate::model::{Task, TaskStatus};
use crate::observability::MetricsCollector;
use crate::protocol::TaskDelivery;
use crate::scheduler::dispatch::DispatchEngine;
use crate::store::Store;
use crate::transport::ConnectionRegistry;
use crate::{sweep_span, task_span};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Bucket sizes observed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub to_process: usize,
    pub timed_out: usize,
    pub to_delete: usize,
    pub recovered: usize,
    pub workers: usize,
}

#[derive(Debug, Default)]
struct Buckets {
    to_process: Vec<Task>,
    timed_out: Vec<Uuid>,
    to_delete: Vec<Task>,
    stuck: Vec<Uuid>,
}

pub struct ProcessingPipeline {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<DispatchEngine>,
    handlers: Arc<HandlerRegistry>,
    metrics: Arc<MetricsCollector>,
    config: PipelineSection,
}

impl ProcessingPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<DispatchEngine>,
        handlers: Arc<HandlerRegistry>,
        metrics: Arc<MetricsCollector>,
        config: PipelineSection,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            handlers,
            metrics,
            config,
        }
    }

    /// Sweep every `sweep_interval` until `shutdown` flips, starting at once
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.sweep_interval_secs,
            workers = self.config.worker_count,
            "Processing pipeline started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep() {
                        error!(error = %e, "Sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Processing pipeline stopped");
    }

    /// Classify all tasks and spawn the resulting work without waiting for it
    pub fn sweep(self: &Arc<Self>) -> SchedulerResult<SweepReport> {
        self.start_sweep().map(|(report, _handles)| report)
    }

    /// Run one sweep and wait for every unit it spawned
    pub async fn sweep_to_completion(self: &Arc<Self>) -> SchedulerResult<SweepReport> {
        let (report, handles) = self.start_sweep()?;
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Sweep unit panicked");
            }
        }
        Ok(report)
    }

    fn start_sweep(self: &Arc<Self>) -> SchedulerResult<(SweepReport, Vec<JoinHandle<()>>)> {
        let started = Instant::now();
        let span = sweep_span!(scanned = tracing::field::Empty);
        let _entered = span.enter();

        let tasks = self.store.list_tasks()?;
        let scanned = tasks.len();
        span.record("scanned", scanned);
        let buckets = self.classify(tasks);

        let mut report = SweepReport {
            scanned,
            to_process: buckets.to_process.len(),
            timed_out: buckets.timed_out.len(),
            to_delete: buckets.to_delete.len(),
            recovered: buckets.stuck.len(),
            workers: 0,
        };
        let mut handles = Vec::new();

        if !buckets.to_delete.is_empty() {
            let pipeline = self.clone();
            let doomed = buckets.to_delete;
            handles.push(tokio::spawn(
                async move { pipeline.delete_expired(doomed) }.instrument(span.clone()),
            ));
        }

        if !buckets.timed_out.is_empty() {
            let pipeline = self.clone();
            let ids = buckets.timed_out;
            handles.push(tokio::spawn(
                async move { pipeline.expire_overdue(ids) }.instrument(span.clone()),
            ));
        }

        if !buckets.stuck.is_empty() {
            let pipeline = self.clone();
            let ids = buckets.stuck;
            handles.push(tokio::spawn(
                async move { pipeline.recover_claims(ids) }.instrument(span.clone()),
            ));
        }

        let mut to_process = buckets.to_process;
        if !to_process.is_empty() {
            to_process.sort_by_key(|task| task.updated_at);
            let chunk_size = to_process.len().div_ceil(self.config.worker_count.max(1));

            for chunk in to_process.chunks(chunk_size) {
                let pipeline = self.clone();
                let ids: Vec<Uuid> = chunk.iter().map(|task| task.id).collect();
                handles.push(tokio::spawn(
                    async move { pipeline.run_worker(ids).await }.instrument(span.clone()),
                ));
                report.workers += 1;
            }
        }

        self.metrics.sweep_completed(started.elapsed());
        info!(
            scanned = report.scanned,
            to_process = report.to_process,
            timed_out = report.timed_out,
            to_delete = report.to_delete,
            recovered = report.recovered,
            workers = report.workers,
            "Sweep scheduled"
        );

        Ok((report, handles))
    }

    fn classify(&self, tasks: Vec<Task>) -> Buckets {
        let now = Utc::now();
        let grace = self.config.timeout_grace();
        let retention = self.config.retention();
        let claim_recovery = self.config.claim_recovery();
        let mut buckets = Buckets::default();

        for task in tasks {
            let idle = task.idle_for(now);
            match task.status {
                TaskStatus::Ready => buckets.to_process.push(task),
                TaskStatus::InProgress => {
                    if task.is_overdue(now, grace) {
                        buckets.timed_out.push(task.id);
                    }
                }
                _ if idle > retention => buckets.to_delete.push(task),
                TaskStatus::Done => buckets.to_process.push(task),
                TaskStatus::Assigned if idle > claim_recovery => buckets.stuck.push(task.id),
                _ => {}
            }
        }

        buckets
    }

    async fn run_worker(self: Arc<Self>, ids: Vec<Uuid>) {
        let claim_id = Uuid::new_v4();
        let claimed = match self.store.update_tasks(&ids, &mut |task| {
            task.status.is_claimable() && task.claim(claim_id).is_ok()
        }) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(error = %e, chunk = ids.len(), "Failed to claim tasks");
                return;
            }
        };

        if claimed.len() < ids.len() {
            debug!(
                requested = ids.len(),
                claimed = claimed.len(),
                "Some tasks were claimed elsewhere"
            );
        }

        for task in claimed {
            let task_id = task.id;
            let span = task_span!(task_id = %task_id);
            let outcome = async {
                match task.claimed_from {
                    Some(TaskStatus::Ready) => self.advance_ready(task).await,
                    Some(TaskStatus::Done) => self.advance_done(task).await,
                    other => {
                        error!(claimed_from = ?other, "Claimed task has unexpected prior status");
                        Ok(())
                    }
                }
            }
            .instrument(span)
            .await;

            if let Err(e) = outcome {
                error!(%task_id, error = %e, "Task processing failed");
            }
        }
    }

    /// Apply `step` to the stored task only while it is still in the status
    /// and claim recorded on `task`. `None` means the claim was lost.
    fn commit_step(
        &self,
        task: &Task,
        step: &mut dyn FnMut(&mut Task) -> bool,
    ) -> SchedulerResult<Option<Task>> {
        let (claim_id, status) = (task.claim_id, task.status);
        let mut written = self
            .store
            .update_tasks(std::slice::from_ref(&task.id), &mut |stored| {
                stored.is_claimed_by(claim_id, status) && step(stored)
            })?;
        Ok(written.pop())
    }

    fn release_load(&self, agent_id: &Uuid) {
        if let Err(e) = self.dispatcher.release(agent_id) {
            warn!(%agent_id, error = %e, "Failed to release agent load");
        }
    }

    /// Dispatch a claimed `Ready` task and deliver it to its agent
    async fn advance_ready(&self, mut task: Task) -> SchedulerResult<()> {
        let charged = match task.agent {
            Some(agent_id) => self.dispatcher.reserve(&agent_id).map(|_| agent_id),
            None => self.dispatcher.select_agent(&task),
        };
        let agent_id = match charged {
            Ok(agent_id) => agent_id,
            Err(e) => return self.fail_task(&task, &e.to_string()),
        };
        task.agent = Some(agent_id);

        let endpoint = match self.registry.get_endpoint(&agent_id).await {
            Some(endpoint) if !endpoint.is_closed() => endpoint,
            _ => {
                self.release_load(&agent_id);
                let reason = SchedulerError::AgentUnavailable { agent_id }.to_string();
                return self.fail_task(&task, &reason);
            }
        };

        let started = self.commit_step(&task, &mut |stored| {
            stored.agent = Some(agent_id);
            stored.transition(TaskStatus::InProgress).is_ok()
        });
        let task = match started {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.release_load(&agent_id);
                debug!(%agent_id, "Claim lost before delivery");
                return Ok(());
            }
            Err(e) => {
                self.release_load(&agent_id);
                return Err(e);
            }
        };
        self.metrics.task_dispatched();

        match endpoint.write(&TaskDelivery::from(&task)).await {
            Ok(()) => info!(%agent_id, "Task delivered"),
            Err(e) => warn!(%agent_id, error = %e, "Task delivery failed, awaiting timeout"),
        }
        Ok(())
    }

    /// Run the response handler for a claimed `Done` task
    async fn advance_done(&self, task: Task) -> SchedulerResult<()> {
        let Some(task) = self.commit_step(&task, &mut |stored| {
            stored.transition(TaskStatus::Processing).is_ok()
        })?
        else {
            debug!("Claim lost before processing");
            return Ok(());
        };

        let Some(response_id) = task.task_response else {
            return self.fail_task(&task, "task has no linked response");
        };
        let response = match self.store.get_response(&response_id) {
            Ok(response) => response,
            Err(e) => return self.fail_task(&task, &e.to_string()),
        };

        if response.is_error() {
            let reason = if response.payload.is_empty() {
                "agent reported an execution error".to_string()
            } else {
                response.payload
            };
            return self.fail_task(&task, &reason);
        }

        let Some(handler) = self.handlers.get(&task.response_handler) else {
            let reason = SchedulerError::handler_not_found(task.response_handler.clone()).to_string();
            return self.fail_task(&task, &reason);
        };

        let summary = match handler.handle(&response.payload, &response.labels).await {
            Ok(summary) => summary,
            Err(e) => return self.fail_task(&task, &e.to_string()),
        };

        match self.commit_step(&task, &mut |stored| stored.succeed(&summary).is_ok())? {
            Some(_) => {
                self.metrics.task_completed(true);
                info!(handler = %task.response_handler, "Task finished ok");
            }
            None => debug!("Claim lost before completion"),
        }
        Ok(())
    }

    fn fail_task(&self, task: &Task, reason: &str) -> SchedulerResult<()> {
        let agent = task.agent;
        let failed = self.commit_step(task, &mut |stored| {
            stored.agent = agent;
            stored.fail(reason).is_ok()
        })?;

        match failed {
            Some(failed) => {
                self.metrics.task_completed(false);
                warn!(task_id = %failed.id, reason = %failed.description, "Task failed");
            }
            None => debug!(task_id = %task.id, "Claim lost before failure was recorded"),
        }
        Ok(())
    }

    fn expire_overdue(&self, ids: Vec<Uuid>) {
        let now = Utc::now();
        let grace = self.config.timeout_grace();

        let expired = match self.store.update_tasks(&ids, &mut |task| {
            if !task.is_overdue(now, grace) {
                return false;
            }
            let budget = task.exec_timeout;
            if task.transition(TaskStatus::Timeout).is_err() {
                return false;
            }
            task.description = format!("task timed out after {budget}s without a response");
            true
        }) {
            Ok(expired) => expired,
            Err(e) => {
                error!(error = %e, "Failed to time out overdue tasks");
                return;
            }
        };

        for task in &expired {
            warn!(task_id = %task.id, agent_id = ?task.agent, "Task timed out");
            if let Some(agent_id) = task.agent {
                if let Err(e) = self.dispatcher.release(&agent_id) {
                    warn!(%agent_id, error = %e, "Failed to release agent load");
                }
            }
        }
        self.metrics.tasks_timed_out(expired.len() as u64);
    }

    fn delete_expired(&self, tasks: Vec<Task>) {
        let response_ids: Vec<Uuid> = tasks.iter().filter_map(|task| task.task_response).collect();
        let task_ids: Vec<Uuid> = tasks.iter().map(|task| task.id).collect();

        if let Err(e) = self.store.delete_responses(&response_ids) {
            error!(error = %e, "Failed to delete expired responses");
            return;
        }
        if let Err(e) = self.store.delete_tasks(&task_ids) {
            error!(error = %e, "Failed to delete expired tasks");
            return;
        }

        self.metrics.tasks_deleted(task_ids.len() as u64);
        info!(
            tasks = task_ids.len(),
            responses = response_ids.len(),
            "Deleted expired tasks"
        );
    }

    fn recover_claims(&self, ids: Vec<Uuid>) {
        let now = Utc::now();
        let claim_recovery = self.config.claim_recovery();

        match self.store.update_tasks(&ids, &mut |task| {
            if task.status != TaskStatus::Assigned || task.idle_for(now) <= claim_recovery {
                return false;
            }
            task.release_claim();
            true
        }) {
            Ok(recovered) => {
                for task in &recovered {
                    warn!(task_id = %task.id, status = %task.status, "Released abandoned claim");
                }
                self.metrics.claims_recovered(recovered.len() as u64);
            }
            Err(e) => error!(error = %e, "Failed to release abandoned claims"),
        }
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
