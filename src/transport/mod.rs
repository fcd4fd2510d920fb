//! Transport layer for agent channels
//!
//! An agent channel is any bidirectional frame transport: a [`FrameSink`] for
//! outbound frames and a [`FrameStream`] for inbound ones. The HTTP server
//! adapts WebSocket connections into a [`Channel`]; tests use in-memory
//! channels from [`crate::testing`].
//!
//! - [`endpoint`] - one live connection handle with its read loop
//! - [`registry`] - agent id to endpoint map
//! - [`router`] - type-keyed dispatch of inbound frames

use futures::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;

pub mod endpoint;
pub mod registry;
pub mod router;

pub use endpoint::Endpoint;
pub use registry::{ConnectionRegistry, RegistryGuard};
pub use router::{InboundHandler, MessageRouter};

/// A unit on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Serialized [`crate::protocol::Frame`]
    Text(String),
    /// Graceful shutdown of the channel
    Close,
}

/// Outbound half of an agent channel
pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;

/// Inbound half of an agent channel
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// Both halves of one agent connection
pub struct Channel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Channel {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("send timed out after {0:?}")]
    SendTimedOut(std::time::Duration),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("agent {0} already has a live connection")]
    AlreadyConnected(uuid::Uuid),
    #[error("invalid agent id: {0}")]
    InvalidAgentId(#[from] crate::protocol::HandshakeError),
}
