//! Typed frames exchanged with agents
//!
//! Every frame on the wire is a JSON object `{"type": <kind>, "data": {...}}`.
//! The `type` selects the handler on the receiving side; `data` is decoded
//! into the matching message struct by that handler.

use crate::model::{ExecStatus, Labels, Task};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Message type tag used to route inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Heartbeat,
    HeartbeatAck,
    TaskDelivery,
    TaskResultBatch,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::HeartbeatAck => "heartbeat_ack",
            MessageKind::TaskDelivery => "task_delivery",
            MessageKind::TaskResultBatch => "task_result_batch",
        };
        write!(f, "{name}")
    }
}

/// A message body with a fixed wire tag
pub trait Message: Serialize + DeserializeOwned + Send + Sync {
    const KIND: MessageKind;
}

/// Tagged envelope as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Wrap a typed message
    pub fn from_message<M: Message>(message: &M) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: M::KIND,
            data: serde_json::to_value(message)?,
        })
    }

    /// Parse a text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the body as message type `M`
    pub fn parse<M: Message>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Periodic liveness signal carrying the agent's descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub architecture: String,
}

impl Message for Heartbeat {
    const KIND: MessageKind = MessageKind::Heartbeat;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatAck {
    pub timestamp: DateTime<Utc>,
}

impl Message for HeartbeatAck {
    const KIND: MessageKind = MessageKind::HeartbeatAck;
}

/// Work sent to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDelivery {
    pub task_id: Uuid,
    pub command: String,
    pub exec_timeout: u64,
    pub dependencies: BTreeSet<String>,
    pub labels: Labels,
}

impl Message for TaskDelivery {
    const KIND: MessageKind = MessageKind::TaskDelivery;
}

impl From<&Task> for TaskDelivery {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            command: task.command.clone(),
            exec_timeout: task.exec_timeout,
            dependencies: task.dependencies.clone(),
            labels: task.labels.clone(),
        }
    }
}

/// One agent-side execution outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: Uuid,
    #[serde(default)]
    pub payload: String,
    pub exec_status: ExecStatus,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskResultBatch {
    pub results: Vec<TaskResult>,
}

impl Message for TaskResultBatch {
    const KIND: MessageKind = MessageKind::TaskResultBatch;
}
