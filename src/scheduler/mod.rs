//! Scheduler components and the composition root that wires them together
//!
//! - [`dispatch`] - least-loaded agent selection
//! - [`pipeline`] - periodic sweep driving tasks through their lifecycle
//! - [`liveness`] - heartbeat supervision
//! - [`inbound`] - handlers for agent-originated frames
//!
//! [`Scheduler`] owns one instance of each, plus the connection registry,
//! handler table and metrics they share.

pub mod dispatch;
pub mod inbound;
pub mod liveness;
pub mod pipeline;

pub use dispatch::DispatchEngine;
pub use inbound::{HeartbeatHandler, TaskResultHandler};
pub use liveness::LivenessMonitor;
pub use pipeline::{ProcessingPipeline, SweepReport};

use crate::config::SchedulerConfig;
use crate::error::SchedulerResult;
use crate::handlers::HandlerRegistry;
use crate::observability::MetricsCollector;
use crate::protocol::MessageKind;
use crate::service::TaskService;
use crate::store::Store;
use crate::transport::{ConnectionRegistry, MessageRouter};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Builds and owns every scheduler component
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<DispatchEngine>,
    pipeline: Arc<ProcessingPipeline>,
    liveness: Arc<LivenessMonitor>,
    service: TaskService,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Wire up all components. Nothing runs until [`Scheduler::start`].
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        handlers: HandlerRegistry,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let handlers = Arc::new(handlers);
        let dispatcher = Arc::new(DispatchEngine::new(store.clone()));

        let router = MessageRouter::new()
            .register(
                MessageKind::Heartbeat,
                Arc::new(HeartbeatHandler::new(store.clone(), metrics.clone())),
            )
            .register(
                MessageKind::TaskResultBatch,
                Arc::new(TaskResultHandler::new(
                    store.clone(),
                    dispatcher.clone(),
                    metrics.clone(),
                )),
            );
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(router),
            config.server.send_timeout(),
        ));

        let pipeline = Arc::new(ProcessingPipeline::new(
            store.clone(),
            registry.clone(),
            dispatcher.clone(),
            handlers.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        ));
        let liveness = Arc::new(LivenessMonitor::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
            config.liveness.clone(),
        ));
        let service = TaskService::new(store.clone(), metrics.clone());
        let (shutdown_tx, _) = watch::channel(false);

        info!(handlers = ?handlers.names(), "Scheduler assembled");

        Ok(Self {
            config,
            store,
            metrics,
            registry,
            dispatcher,
            pipeline,
            liveness,
            service,
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the pipeline and liveness loops
    pub async fn start(&self) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return;
        }

        loops.push(tokio::spawn(
            self.pipeline.clone().run(self.shutdown_tx.subscribe()),
        ));
        loops.push(tokio::spawn(
            self.liveness.clone().run(self.shutdown_tx.subscribe()),
        ));
        info!("Scheduler started");
    }

    /// Stop both loops, wait for them, then close every agent connection
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let loops: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop panicked");
            }
        }

        self.registry.close_all().await;
        info!("Scheduler stopped");
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<DispatchEngine> {
        &self.dispatcher
    }

    pub fn pipeline(&self) -> &Arc<ProcessingPipeline> {
        &self.pipeline
    }

    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
