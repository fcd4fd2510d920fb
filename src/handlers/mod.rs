//! Named post-processing of completed task payloads
//!
//! A task names the handler that interprets its agent's output. When the
//! pipeline finalizes a `Done` task it looks the handler up here and invokes
//! it with the response payload and labels; the returned text becomes the
//! task's success description.
//!
//! ```rust
//! use dispatchd::handlers::HandlerRegistry;
//! use dispatchd::model::Labels;
//!
//! # tokio_test::block_on(async {
//! let registry = HandlerRegistry::with_builtins();
//! let echo = registry.get("echo").unwrap();
//! let summary = echo.handle("4 passed", &Labels::new()).await.unwrap();
//! assert_eq!(summary, "4 passed");
//! # });
//! ```

use crate::model::Labels;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod builtin;

pub use builtin::{DiscardHandler, EchoHandler};

/// Post-processes one successful agent payload
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Returns a success summary, or an error that fails the task
    async fn handle(&self, payload: &str, labels: &Labels) -> Result<String, HandlerError>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("payload rejected: {0}")]
    InvalidPayload(String),
}

impl HandlerError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }
}

/// Name to handler table, populated before the scheduler starts
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResponseHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo` and `discard`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoHandler));
        registry.register("discard", Arc::new(DiscardHandler));
        registry
    }

    /// Register `handler` under `name`; a later registration wins
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ResponseHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl ResponseHandler for Upper {
        async fn handle(&self, payload: &str, _labels: &Labels) -> Result<String, HandlerError> {
            Ok(payload.to_uppercase())
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(registry.names().is_empty());
        assert!(registry.get("echo").is_none());
    }

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["discard", "echo"]);
    }

    #[tokio::test]
    async fn test_custom_handler_lookup_and_invoke() {
        let mut registry = HandlerRegistry::new();
        registry.register("upper", Arc::new(Upper));

        let handler = registry.get("upper").unwrap();
        let summary = handler.handle("all passed", &Labels::new()).await.unwrap();
        assert_eq!(summary, "ALL PASSED");
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::failed("grade store offline").to_string(), "grade store offline");
        assert_eq!(
            HandlerError::InvalidPayload("not json".to_string()).to_string(),
            "payload rejected: not json"
        );
    }
}
