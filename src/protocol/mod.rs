//! Wire protocol between the scheduler and its agents
//!
//! [`messages`] defines the tagged frames, [`handshake`] the identification
//! performed before a channel is accepted.

pub mod handshake;
pub mod messages;

pub use handshake::{parse_agent_id, HandshakeError, AGENT_ID_HEADER, AGENT_USER_HEADER};
pub use messages::*;
