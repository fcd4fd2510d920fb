//! Mock implementations for testing
//!
//! Provides an in-memory agent channel, response handlers that record, fail
//! or park, a store with injectable faults, and helpers to seed a store and assemble a scheduler without a
//! network listener.

use crate::config::SchedulerConfig;
use crate::handlers::{HandlerError, HandlerRegistry, ResponseHandler};
use crate::model::{Agent, ExecStatus, Labels, Task, TaskResponse};
use crate::protocol::{
    Frame, Heartbeat, Message, MessageKind, TaskDelivery, TaskResult, TaskResultBatch,
};
use crate::scheduler::Scheduler;
use crate::store::{MemoryStore, Store, StoreError, StoreResult};
use crate::transport::{Channel, TransportError, WireFrame};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// The agent's side of an in-memory channel
pub struct MockAgent {
    pub id: Uuid,
    outbound: mpsc::UnboundedSender<Result<WireFrame, TransportError>>,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
}

/// Create a connected pair: the scheduler-side [`Channel`] and the agent side
pub fn mock_channel(agent_id: Uuid) -> (Channel, MockAgent) {
    let (to_scheduler, from_agent) = mpsc::unbounded();
    let (to_agent, from_scheduler) = mpsc::unbounded();

    let sink = to_agent.sink_map_err(|e| TransportError::SendFailed(e.to_string()));
    let channel = Channel::new(Box::pin(sink), Box::pin(from_agent));

    let agent = MockAgent {
        id: agent_id,
        outbound: to_scheduler,
        inbound: from_scheduler,
    };
    (channel, agent)
}

/// A channel whose writes always fail and whose reads never complete
pub fn broken_channel() -> Channel {
    let sink = futures::sink::unfold((), |_, _frame: WireFrame| async {
        Err::<(), _>(TransportError::SendFailed("broken pipe".to_string()))
    });
    let stream = futures::stream::pending::<Result<WireFrame, TransportError>>();
    Channel::new(Box::pin(sink), Box::pin(stream))
}

/// A channel whose peer never reads: writes and closes never complete
pub fn stalled_channel() -> Channel {
    let sink = futures::sink::unfold((), |_, _frame: WireFrame| {
        futures::future::pending::<Result<(), TransportError>>()
    });
    let stream = futures::stream::pending::<Result<WireFrame, TransportError>>();
    Channel::new(Box::pin(sink), Box::pin(stream))
}

impl MockAgent {
    pub fn send<M: Message>(&self, message: &M) {
        let text = Frame::from_message(message)
            .and_then(|frame| frame.encode())
            .expect("mock frame serializes");
        self.send_raw(text);
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.outbound.unbounded_send(Ok(WireFrame::Text(text.into())));
    }

    pub fn heartbeat(&self, os_type: &str, architecture: &str) {
        self.send(&Heartbeat {
            user: "runner".to_string(),
            hostname: format!("host-{}", &self.id.to_string()[..8]),
            ip: "127.0.0.1".to_string(),
            os_type: os_type.to_string(),
            architecture: architecture.to_string(),
        });
    }

    pub fn report(&self, task_id: Uuid, payload: &str, exec_status: ExecStatus) {
        self.send(&TaskResultBatch {
            results: vec![TaskResult {
                task_id,
                payload: payload.to_string(),
                exec_status,
                labels: Labels::new(),
            }],
        });
    }

    /// Simulate a read error on the scheduler side
    pub fn fail_read(&self) {
        let _ = self
            .outbound
            .unbounded_send(Err(TransportError::ReceiveFailed("connection reset".to_string())));
    }

    /// Close the agent's sending half
    pub fn hang_up(&self) {
        self.outbound.close_channel();
    }

    /// Next frame from the scheduler, `None` on timeout or closed channel
    pub async fn recv(&mut self) -> Option<WireFrame> {
        tokio::time::timeout(RECV_TIMEOUT, self.inbound.next())
            .await
            .ok()
            .flatten()
    }

    /// Next protocol frame, skipping close frames
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            match self.recv().await? {
                WireFrame::Text(text) => return Frame::decode(&text).ok(),
                WireFrame::Close => continue,
            }
        }
    }

    /// Wait for the next task delivery, skipping other frames
    pub async fn recv_delivery(&mut self) -> Option<TaskDelivery> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.kind == MessageKind::TaskDelivery {
                return frame.parse().ok();
            }
        }
    }

    /// Frames already queued, without waiting
    pub fn drain(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.inbound.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the scheduler has dropped its sending half
    pub fn is_disconnected(&mut self) -> bool {
        loop {
            match self.inbound.try_next() {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}

/// Records every invocation and answers with a fixed summary
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(String, Labels)>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Labels)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResponseHandler for RecordingHandler {
    async fn handle(&self, payload: &str, labels: &Labels) -> Result<String, HandlerError> {
        self.calls.lock().push((payload.to_string(), labels.clone()));
        Ok(format!("recorded {} bytes", payload.len()))
    }
}

/// Fails every invocation with the given message
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ResponseHandler for FailingHandler {
    async fn handle(&self, _payload: &str, _labels: &Labels) -> Result<String, HandlerError> {
        Err(HandlerError::failed(self.message.clone()))
    }
}

/// Holds its first invocation until [`GatedHandler::open`], then answers
/// every call with `handled <payload>`
#[derive(Debug, Default)]
pub struct GatedHandler {
    entered: Notify,
    gate: Notify,
    calls: Mutex<Vec<String>>,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once the first invocation is parked at the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }

    /// Payloads in invocation order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResponseHandler for GatedHandler {
    async fn handle(&self, payload: &str, _labels: &Labels) -> Result<String, HandlerError> {
        let first = {
            let mut calls = self.calls.lock();
            calls.push(payload.to_string());
            calls.len() == 1
        };
        if first {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        Ok(format!("handled {payload}"))
    }
}

/// [`MemoryStore`] wrapper whose agent writes start failing after a budget
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    agent_writes_left: Mutex<Option<usize>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `count` more agent writes through, then fail every one after
    pub fn fail_agent_writes_after(&self, count: usize) {
        *self.agent_writes_left.lock() = Some(count);
    }

    fn charge_agent_write(&self) -> StoreResult<()> {
        let mut left = self.agent_writes_left.lock();
        match left.as_mut() {
            Some(0) => Err(StoreError::Backend("agent collection unavailable".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Store for FaultyStore {
    fn get_agent(&self, id: &Uuid) -> StoreResult<Agent> {
        self.inner.get_agent(id)
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        self.inner.list_agents()
    }

    fn put_agents(&self, agents: &[Agent]) -> StoreResult<()> {
        self.charge_agent_write()?;
        self.inner.put_agents(agents)
    }

    fn update_agents(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Agent) -> bool,
    ) -> StoreResult<Vec<Agent>> {
        self.charge_agent_write()?;
        self.inner.update_agents(ids, update)
    }

    fn get_task(&self, id: &Uuid) -> StoreResult<Task> {
        self.inner.get_task(id)
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks()
    }

    fn put_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        self.inner.put_tasks(tasks)
    }

    fn update_tasks(
        &self,
        ids: &[Uuid],
        update: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Vec<Task>> {
        self.inner.update_tasks(ids, update)
    }

    fn delete_tasks(&self, ids: &[Uuid]) -> StoreResult<()> {
        self.inner.delete_tasks(ids)
    }

    fn get_response(&self, id: &Uuid) -> StoreResult<TaskResponse> {
        self.inner.get_response(id)
    }

    fn delete_responses(&self, ids: &[Uuid]) -> StoreResult<()> {
        self.inner.delete_responses(ids)
    }

    fn commit_response(
        &self,
        response: &TaskResponse,
        link: &mut dyn FnMut(&mut Task) -> bool,
    ) -> StoreResult<Option<Task>> {
        self.inner.commit_response(response, link)
    }
}

/// Store a live agent with the given platform
pub fn seed_agent(store: &dyn Store, os_type: &str, architecture: &str) -> Agent {
    let agent = Agent::new(Uuid::new_v4()).with_platform(os_type, architecture);
    store.put_agent(&agent).expect("memory store accepts agents");
    agent
}

/// Defaults with short intervals suited to tests
pub fn test_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.scheduler.sweep_interval_secs = 1;
    config.scheduler.timeout_grace_secs = 1;
    config.liveness.check_interval_secs = 1;
    config
}

/// Scheduler over a fresh [`MemoryStore`], returned with the store
pub fn test_scheduler(
    config: SchedulerConfig,
    handlers: HandlerRegistry,
) -> (Arc<Scheduler>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let scheduler =
        Scheduler::new(config, store.clone(), handlers).expect("test config is valid");
    (Arc::new(scheduler), store)
}

/// Register an in-memory connection for a fresh agent and send its first heartbeat
pub async fn connect_agent(
    scheduler: &Scheduler,
    os_type: &str,
    architecture: &str,
) -> MockAgent {
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .expect("fresh agent id is free");

    agent.heartbeat(os_type, architecture);
    let ack = agent.recv_frame().await.expect("heartbeat is acknowledged");
    assert_eq!(ack.kind, MessageKind::HeartbeatAck);
    agent
}
