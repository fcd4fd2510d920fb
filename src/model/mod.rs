//! Persisted records: agents, tasks and task responses
//!
//! These are plain serializable descriptors. The scheduler components own the
//! mutations; collaborators only read them back through the intake API.

pub mod agent;
pub mod response;
pub mod task;

use std::collections::BTreeMap;

pub use agent::{Agent, AgentStatus};
pub use response::{ExecStatus, TaskResponse};
pub use task::{Task, TaskBuilder, TaskStatus};

/// Opaque key/value bag carried from task to response handler
pub type Labels = BTreeMap<String, String>;
