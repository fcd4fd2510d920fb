//! Type-keyed dispatch of inbound frames

use super::Endpoint;
use crate::error::SchedulerResult;
use crate::protocol::{Frame, MessageKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles one kind of inbound frame
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, endpoint: Arc<Endpoint>, frame: Frame) -> SchedulerResult<()>;
}

/// Table from message kind to handler, built once at startup
#[derive(Default)]
pub struct MessageRouter {
    handlers: HashMap<MessageKind, Arc<dyn InboundHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous entry
    pub fn register(mut self, kind: MessageKind, handler: Arc<dyn InboundHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Route a frame to its handler. Errors are logged, never propagated
    /// back into the endpoint's read loop.
    pub async fn dispatch(&self, endpoint: Arc<Endpoint>, frame: Frame) {
        let agent_id = endpoint.agent_id();
        let kind = frame.kind;

        let Some(handler) = self.handlers.get(&kind) else {
            warn!(%agent_id, %kind, "No handler registered for inbound frame");
            return;
        };

        debug!(%agent_id, %kind, "Dispatching inbound frame");
        if let Err(e) = handler.handle(endpoint, frame).await {
            warn!(%agent_id, %kind, error = %e, "Inbound handler failed");
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
