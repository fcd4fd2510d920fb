//! Server-side handle for one live agent channel

use super::router::MessageRouter;
use super::{Channel, FrameSink, FrameStream, TransportError, WireFrame};
use crate::protocol::{Frame, Message};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection handle for one agent.
///
/// The outbound half sits behind one mutex so a write can never interleave
/// with a close. Every send and close on it is bounded by `send_timeout`; a
/// peer that stops reading gets its endpoint closed instead of holding the
/// mutex. Inbound frames are read by a single dedicated task started in
/// [`Endpoint::spawn`].
pub struct Endpoint {
    agent_id: Uuid,
    user: String,
    send_timeout: Duration,
    writer: Mutex<Option<FrameSink>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Endpoint {
    /// Take ownership of `channel` and start its read loop
    pub fn spawn(
        agent_id: Uuid,
        user: String,
        channel: Channel,
        router: Arc<MessageRouter>,
        send_timeout: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let Channel { sink, stream } = channel;

        let endpoint = Arc::new(Self {
            agent_id,
            user,
            send_timeout,
            writer: Mutex::new(Some(sink)),
            closed: AtomicBool::new(false),
            shutdown_tx,
        });

        let reader = endpoint.clone();
        tokio::spawn(async move {
            reader.read_loop(stream, router, shutdown_rx).await;
        });

        endpoint
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn read_loop(
        self: Arc<Self>,
        mut stream: FrameStream,
        router: Arc<MessageRouter>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!(agent_id = %self.agent_id, "Endpoint read loop started");

        loop {
            let next = tokio::select! {
                _ = shutdown_rx.changed() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(WireFrame::Text(text))) => match Frame::decode(&text) {
                    Ok(frame) => {
                        let router = router.clone();
                        let endpoint = self.clone();
                        tokio::spawn(async move {
                            router.dispatch(endpoint, frame).await;
                        });
                    }
                    Err(e) => {
                        warn!(agent_id = %self.agent_id, error = %e, "Discarding malformed frame");
                    }
                },
                Some(Ok(WireFrame::Close)) | None => {
                    info!(agent_id = %self.agent_id, "Agent closed its channel");
                    break;
                }
                Some(Err(e)) => {
                    warn!(agent_id = %self.agent_id, error = %e, "Channel read failed");
                    break;
                }
            }
        }

        self.teardown(false).await;
        debug!(agent_id = %self.agent_id, "Endpoint read loop stopped");
    }

    /// Serialize and send one message.
    ///
    /// Writes to a closed endpoint are dropped and reported as success. A send
    /// that fails or outlives `send_timeout` closes the endpoint and is
    /// returned to the caller.
    pub async fn write<M: Message>(&self, message: &M) -> Result<(), TransportError> {
        let text = Frame::from_message(message)
            .and_then(|frame| frame.encode())
            .map_err(TransportError::Serialization)?;

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut().filter(|_| !self.is_closed()) else {
            debug!(agent_id = %self.agent_id, kind = %M::KIND, "Dropping frame for closed endpoint");
            return Ok(());
        };

        if let Err(e) = self.send_bounded(sink, WireFrame::Text(text)).await {
            warn!(agent_id = %self.agent_id, error = %e, "Channel write failed, closing endpoint");
            self.closed.store(true, Ordering::SeqCst);
            let sink = writer.take();
            // A peer that stalled the send would stall the close too; drop it
            if let Some(sink) = sink.filter(|_| !matches!(e, TransportError::SendTimedOut(_))) {
                self.close_bounded(sink).await;
            }
            let _ = self.shutdown_tx.send(true);
            return Err(e);
        }

        Ok(())
    }

    /// Send a close frame and shut the channel down. Safe to call repeatedly
    /// and concurrently with writes or a failing reader.
    pub async fn close(&self) {
        self.teardown(true).await;
    }

    async fn teardown(&self, graceful: bool) {
        // Stop the reader first so a stalled writer cannot delay it
        let already_closed = self.closed.swap(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let mut writer = self.writer.lock().await;
        if already_closed && writer.is_none() {
            return;
        }

        if let Some(mut sink) = writer.take() {
            if graceful {
                if let Err(e) = self.send_bounded(&mut sink, WireFrame::Close).await {
                    debug!(agent_id = %self.agent_id, error = %e, "Close frame not delivered");
                }
            }
            self.close_bounded(sink).await;
        }

        debug!(agent_id = %self.agent_id, graceful, "Endpoint closed");
    }

    async fn send_bounded(
        &self,
        sink: &mut FrameSink,
        frame: WireFrame,
    ) -> Result<(), TransportError> {
        tokio::time::timeout(self.send_timeout, sink.send(frame))
            .await
            .unwrap_or_else(|_| Err(TransportError::SendTimedOut(self.send_timeout)))
    }

    async fn close_bounded(&self, mut sink: FrameSink) {
        match tokio::time::timeout(self.send_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(agent_id = %self.agent_id, error = %e, "Channel close failed"),
            Err(_) => debug!(agent_id = %self.agent_id, "Channel close timed out, dropping it"),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("agent_id", &self.agent_id)
            .field("user", &self.user)
            .field("closed", &self.is_closed())
            .finish()
    }
}
