//! Connection registry and endpoint lifecycle tests
//!
//! Agents are simulated with in-memory channels so every failure mode
//! (peer hang-up, read error, broken pipe) can be triggered on demand.

use dispatchd::handlers::HandlerRegistry;
use dispatchd::protocol::{HeartbeatAck, MessageKind};
use dispatchd::testing::{broken_channel, mock_channel, test_config, test_scheduler};
use dispatchd::transport::{Endpoint, TransportError, WireFrame};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_until_closed(endpoint: &Arc<Endpoint>) {
    for _ in 0..100 {
        if endpoint.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("endpoint for {} never closed", endpoint.agent_id());
}

fn ack() -> HeartbeatAck {
    HeartbeatAck {
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_second_connection_for_same_id_is_rejected() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let registry = scheduler.registry();
    let agent_id = Uuid::new_v4();

    let (first, _agent) = mock_channel(agent_id);
    registry.add_endpoint(agent_id, first, "runner").await.unwrap();

    let (second, _duplicate) = mock_channel(agent_id);
    let result = registry.add_endpoint(agent_id, second, "runner").await;

    assert!(matches!(result, Err(TransportError::AlreadyConnected(id)) if id == agent_id));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_closed_endpoint_can_be_replaced() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let registry = scheduler.registry();
    let agent_id = Uuid::new_v4();

    let (first, _agent) = mock_channel(agent_id);
    let endpoint = registry.add_endpoint(agent_id, first, "runner").await.unwrap();
    endpoint.close().await;
    assert!(!registry.is_connected(&agent_id).await);

    let (second, _reconnected) = mock_channel(agent_id);
    let replacement = registry.add_endpoint(agent_id, second, "runner").await.unwrap();

    assert!(!replacement.is_closed());
    assert!(registry.is_connected(&agent_id).await);
}

#[tokio::test]
async fn test_close_is_idempotent_and_sends_one_close_frame() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    endpoint.close().await;
    endpoint.close().await;

    let frames = agent.drain();
    assert_eq!(frames, vec![WireFrame::Close]);
    assert!(agent.is_disconnected());
}

#[tokio::test]
async fn test_write_after_close_is_silently_dropped() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    endpoint.close().await;
    agent.drain();

    assert!(endpoint.write(&ack()).await.is_ok());
    assert!(agent.drain().is_empty());
}

#[tokio::test]
async fn test_write_delivers_typed_frame() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    endpoint.write(&ack()).await.unwrap();

    let frame = agent.recv_frame().await.expect("ack delivered");
    assert_eq!(frame.kind, MessageKind::HeartbeatAck);
}

#[tokio::test]
async fn test_read_error_tears_down_endpoint() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    agent.fail_read();
    wait_until_closed(&endpoint).await;

    assert!(!scheduler.registry().is_connected(&agent.id).await);
    assert!(agent.is_disconnected());
}

#[tokio::test]
async fn test_peer_hang_up_tears_down_endpoint() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    agent.hang_up();
    wait_until_closed(&endpoint).await;
}

#[tokio::test]
async fn test_broken_pipe_fails_write_and_closes() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let agent_id = Uuid::new_v4();
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent_id, broken_channel(), "runner")
        .await
        .unwrap();

    let result = endpoint.write(&ack()).await;

    assert!(matches!(result, Err(TransportError::SendFailed(_))));
    assert!(endpoint.is_closed());
    assert!(endpoint.write(&ack()).await.is_ok());
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let (channel, mut agent) = mock_channel(Uuid::new_v4());
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, channel, "runner")
        .await
        .unwrap();

    agent.send_raw("{not json");
    agent.send_raw(r#"{"type":"no_such_kind","data":{}}"#);
    agent.heartbeat("linux", "amd64");

    let frame = agent.recv_frame().await.expect("heartbeat still acknowledged");
    assert_eq!(frame.kind, MessageKind::HeartbeatAck);
    assert!(!endpoint.is_closed());
}

#[tokio::test]
async fn test_close_all_empties_registry() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::new());
    let mut agents = Vec::new();
    for _ in 0..3 {
        let (channel, agent) = mock_channel(Uuid::new_v4());
        scheduler
            .registry()
            .add_endpoint(agent.id, channel, "runner")
            .await
            .unwrap();
        agents.push(agent);
    }
    assert_eq!(scheduler.registry().connected_ids().await.len(), 3);

    scheduler.registry().close_all().await;

    assert!(scheduler.registry().is_empty().await);
    for agent in &mut agents {
        assert_eq!(agent.drain(), vec![WireFrame::Close]);
    }
}
