//! Agent descriptor

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness status of an agent as last decided by heartbeats and the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Up,
    Down,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Up => write!(f, "up"),
            AgentStatus::Down => write!(f, "down"),
        }
    }
}

/// One worker process known to the scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: Uuid,
    pub user: String,
    pub hostname: String,
    pub ip: String,
    pub os_type: String,
    pub architecture: String,
    pub status: AgentStatus,
    /// Advisory load counter used for least-loaded placement
    pub num_running_tasks: u64,
    pub last_keepalive: DateTime<Utc>,
}

impl Agent {
    /// Create a freshly seen agent with no descriptor fields filled in yet
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            user: String::new(),
            hostname: String::new(),
            ip: String::new(),
            os_type: String::new(),
            architecture: String::new(),
            status: AgentStatus::Up,
            num_running_tasks: 0,
            last_keepalive: Utc::now(),
        }
    }

    /// Builder method to set capability tags
    pub fn with_platform(mut self, os_type: &str, architecture: &str) -> Self {
        self.os_type = os_type.to_string();
        self.architecture = architecture.to_string();
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == AgentStatus::Up
    }

    /// Whether this agent satisfies a task's capability filters.
    /// An empty filter matches any agent.
    pub fn accepts(&self, os_type: &str, architecture: &str) -> bool {
        (os_type.is_empty() || self.os_type == os_type)
            && (architecture.is_empty() || self.architecture == architecture)
    }

    /// Whether the last heartbeat is older than `timeout`
    pub fn keepalive_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_keepalive) > timeout
    }
}
