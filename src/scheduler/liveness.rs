//! Declares agents down when their heartbeats stop

use crate::agent_span;
use crate::config::LivenessSection;
use crate::error::SchedulerResult;
use crate::model::AgentStatus;
use crate::observability::MetricsCollector;
use crate::store::Store;
use crate::transport::ConnectionRegistry;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

pub struct LivenessMonitor {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<MetricsCollector>,
    config: LivenessSection,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<MetricsCollector>,
        config: LivenessSection,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            config,
        }
    }

    /// Check every `check_interval` until `shutdown` flips, starting at once
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.check_interval_secs,
            timeout_secs = self.config.keepalive_timeout_secs,
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        error!(error = %e, "Liveness check failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Liveness monitor stopped");
    }

    /// Mark every live agent with an expired keepalive as down and drop its
    /// connection. Marking and removal happen under the registry lock; the
    /// removed connections are closed after it is released. Returns the ids
    /// that were marked down.
    pub async fn check(&self) -> SchedulerResult<Vec<Uuid>> {
        let (downed, removed) = {
            let mut registry = self.registry.lock().await;
            let now = Utc::now();
            let timeout = self.config.keepalive_timeout();

            let stale: Vec<Uuid> = self
                .store
                .list_agents()?
                .into_iter()
                .filter(|agent| agent.is_up() && agent.keepalive_expired(now, timeout))
                .map(|agent| agent.id)
                .collect();

            if stale.is_empty() {
                debug!("All agents within keepalive window");
                return Ok(Vec::new());
            }

            let downed = self.store.update_agents(&stale, &mut |agent| {
                if !agent.is_up() || !agent.keepalive_expired(now, timeout) {
                    return false;
                }
                agent.status = AgentStatus::Down;
                true
            })?;

            let removed: Vec<_> = downed
                .iter()
                .map(|agent| registry.remove(&agent.id))
                .collect();
            (downed, removed)
        };

        let closing = downed.iter().zip(removed).map(|(agent, endpoint)| {
            let span = agent_span!(agent_id = %agent.id);
            async move {
                let connection_closed = endpoint.is_some();
                if let Some(endpoint) = endpoint {
                    endpoint.close().await;
                }
                warn!(
                    hostname = %agent.hostname,
                    last_keepalive = %agent.last_keepalive,
                    connection_closed,
                    "Agent missed its keepalive, marked down"
                );
            }
            .instrument(span)
        });
        futures::future::join_all(closing).await;

        let ids: Vec<Uuid> = downed.iter().map(|agent| agent.id).collect();
        self.metrics.agents_marked_down(ids.len() as u64);
        Ok(ids)
    }
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
