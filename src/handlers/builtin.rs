//! Handlers available without any configuration

use super::{HandlerError, ResponseHandler};
use crate::model::Labels;
use async_trait::async_trait;
use tracing::debug;

/// Uses the payload itself as the success description
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl ResponseHandler for EchoHandler {
    async fn handle(&self, payload: &str, _labels: &Labels) -> Result<String, HandlerError> {
        Ok(payload.to_string())
    }
}

/// Accepts any payload and keeps nothing of it
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardHandler;

#[async_trait]
impl ResponseHandler for DiscardHandler {
    async fn handle(&self, payload: &str, _labels: &Labels) -> Result<String, HandlerError> {
        debug!(bytes = payload.len(), "Discarding task payload");
        Ok("payload discarded".to_string())
    }
}
