//! Agent id to live endpoint map

use super::router::MessageRouter;
use super::{Channel, Endpoint, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of live agent connections.
///
/// At most one open endpoint exists per agent id. Every endpoint created
/// here routes its inbound frames through the shared [`MessageRouter`].
pub struct ConnectionRegistry {
    endpoints: RwLock<HashMap<Uuid, Arc<Endpoint>>>,
    router: Arc<MessageRouter>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    /// `send_timeout` bounds every outbound write and close on the endpoints
    /// created here
    pub fn new(router: Arc<MessageRouter>, send_timeout: Duration) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            router,
            send_timeout,
        }
    }

    /// Register a freshly accepted channel for `agent_id`.
    ///
    /// Fails with [`TransportError::AlreadyConnected`] while another open
    /// endpoint holds the id; a closed one is replaced.
    pub async fn add_endpoint(
        &self,
        agent_id: Uuid,
        channel: Channel,
        user: impl Into<String>,
    ) -> Result<Arc<Endpoint>, TransportError> {
        let mut endpoints = self.endpoints.write().await;

        if let Some(existing) = endpoints.get(&agent_id) {
            if !existing.is_closed() {
                return Err(TransportError::AlreadyConnected(agent_id));
            }
            debug!(%agent_id, "Replacing closed endpoint");
        }

        let endpoint = Endpoint::spawn(
            agent_id,
            user.into(),
            channel,
            self.router.clone(),
            self.send_timeout,
        );
        endpoints.insert(agent_id, endpoint.clone());
        info!(%agent_id, connected = endpoints.len(), "Agent connected");
        Ok(endpoint)
    }

    pub async fn get_endpoint(&self, agent_id: &Uuid) -> Option<Arc<Endpoint>> {
        self.endpoints.read().await.get(agent_id).cloned()
    }

    /// True when an open endpoint is registered for the id
    pub async fn is_connected(&self, agent_id: &Uuid) -> bool {
        self.endpoints
            .read()
            .await
            .get(agent_id)
            .is_some_and(|endpoint| !endpoint.is_closed())
    }

    /// Close every endpoint and empty the registry
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Endpoint>> = {
            let mut endpoints = self.endpoints.write().await;
            endpoints.drain().map(|(_, endpoint)| endpoint).collect()
        };

        let count = drained.len();
        futures::future::join_all(drained.iter().map(|endpoint| endpoint.close())).await;
        info!(count, "Closed all agent connections");
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    /// Sorted ids of all registered endpoints
    pub async fn connected_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.endpoints.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Hold the registry write lock across a multi-step operation
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            endpoints: self.endpoints.write().await,
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

/// Exclusive access to the registry while it is held
pub struct RegistryGuard<'a> {
    endpoints: RwLockWriteGuard<'a, HashMap<Uuid, Arc<Endpoint>>>,
}

impl RegistryGuard<'_> {
    /// Drop the endpoint for `agent_id` from the map without closing it.
    ///
    /// Close the returned endpoint after releasing the guard so a slow peer
    /// never holds the registry.
    pub fn remove(&mut self, agent_id: &Uuid) -> Option<Arc<Endpoint>> {
        self.endpoints.remove(agent_id)
    }
}
