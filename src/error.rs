//! Error types for the remote execution scheduler
//!
//! Every failure that can terminate a task maps onto one [`SchedulerError`]
//! variant. The `Display` text of the error is what ends up in a task's
//! human-readable `description`, after passing through
//! [`sanitize_description`].

use crate::model::TaskStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on the size of a stored task description
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Main error type for scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("no eligible agents for os_type '{os_type}' architecture '{architecture}'")]
    NoEligibleAgents {
        os_type: String,
        architecture: String,
    },

    #[error("agent unavailable: {agent_id}")]
    AgentUnavailable { agent_id: Uuid },

    #[error("handler not found: {name}")]
    HandlerNotFound { name: String },

    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} has no response yet")]
    ResponsePending { task_id: Uuid },

    #[error("result for task {task_id} rejected: {reason}")]
    ResultRejected { task_id: Uuid, reason: String },

    #[error("Storage error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SchedulerError {
    /// Create insufficient data error
    pub fn insufficient_data<S: Into<String>>(message: S) -> Self {
        Self::InsufficientData {
            message: message.into(),
        }
    }

    /// Create no eligible agents error
    pub fn no_eligible_agents(os_type: &str, architecture: &str) -> Self {
        Self::NoEligibleAgents {
            os_type: display_filter(os_type),
            architecture: display_filter(architecture),
        }
    }

    /// Create handler not found error
    pub fn handler_not_found<S: Into<String>>(name: S) -> Self {
        Self::HandlerNotFound { name: name.into() }
    }

    /// Create rejected result error
    pub fn result_rejected<S: Into<String>>(task_id: Uuid, reason: S) -> Self {
        Self::ResultRejected {
            task_id,
            reason: reason.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the requested record does not exist, or not yet
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(crate::store::StoreError::NotFound { .. })
                | SchedulerError::ResponsePending { .. }
        )
    }
}

fn display_filter(filter: &str) -> String {
    if filter.is_empty() {
        "*".to_string()
    } else {
        filter.to_string()
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("sensitive path pattern is valid")
});

/// Mask secret-looking fragments and bound the length of a task description.
///
/// Agent payloads and handler errors are stored verbatim in task records that
/// collaborators can read back, so credentials echoed by a failing command must
/// not survive into the description.
pub fn sanitize_description(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_DESCRIPTION_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_DESCRIPTION_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
