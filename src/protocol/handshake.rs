//! Connection handshake: agent identification header
//!
//! An agent identifies itself when opening its channel with a fixed-length
//! header holding its id in canonical hyphenated UUID form.

use thiserror::Error;
use uuid::Uuid;

/// Header carrying the agent id
pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// Optional header carrying the OS user the agent runs as
pub const AGENT_USER_HEADER: &str = "x-agent-user";

/// Length of a hyphenated UUID
pub const AGENT_ID_LEN: usize = 36;

#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    #[error("missing agent id header")]
    MissingAgentId,
    #[error("agent id must be {AGENT_ID_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("agent id is not a valid identifier: {0}")]
    Malformed(String),
}

/// Validate the agent id header value
pub fn parse_agent_id(header: Option<&str>) -> Result<Uuid, HandshakeError> {
    let value = header.ok_or(HandshakeError::MissingAgentId)?;

    if value.len() != AGENT_ID_LEN {
        return Err(HandshakeError::InvalidLength(value.len()));
    }

    Uuid::parse_str(value).map_err(|_| HandshakeError::Malformed(value.to_string()))
}
