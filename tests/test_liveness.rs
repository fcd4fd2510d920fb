//! Heartbeat supervision tests
//!
//! Keepalive ages are simulated by back-dating `last_keepalive` in the store
//! rather than sleeping through the timeout.

use chrono::{Duration, Utc};
use dispatchd::handlers::HandlerRegistry;
use dispatchd::model::AgentStatus;
use dispatchd::protocol::{HeartbeatAck, MessageKind};
use dispatchd::store::Store;
use dispatchd::testing::{connect_agent, seed_agent, stalled_channel, test_config, test_scheduler};
use dispatchd::transport::TransportError;
use uuid::Uuid;

fn backdate(store: &dyn Store, agent_id: &Uuid, seconds: i64) {
    store
        .update_agent(agent_id, &mut |agent| {
            agent.last_keepalive = Utc::now() - Duration::seconds(seconds);
        })
        .unwrap();
}

#[tokio::test]
async fn test_heartbeat_registers_agent_descriptor() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let agent = connect_agent(&scheduler, "darwin", "arm64").await;

    let stored = store.get_agent(&agent.id).unwrap();
    assert_eq!(stored.status, AgentStatus::Up);
    assert_eq!(stored.os_type, "darwin");
    assert_eq!(stored.architecture, "arm64");
    assert_eq!(stored.user, "runner");
    assert_eq!(scheduler.metrics().snapshot().agents.heartbeats_received, 1);
}

#[tokio::test]
async fn test_stale_agent_marked_down_and_disconnected() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let mut stale = connect_agent(&scheduler, "linux", "amd64").await;
    let fresh = connect_agent(&scheduler, "linux", "amd64").await;

    backdate(store.as_ref(), &stale.id, 61);
    backdate(store.as_ref(), &fresh.id, 59);

    let downed = scheduler.liveness().check().await.unwrap();

    assert_eq!(downed, vec![stale.id]);
    assert_eq!(store.get_agent(&stale.id).unwrap().status, AgentStatus::Down);
    assert_eq!(store.get_agent(&fresh.id).unwrap().status, AgentStatus::Up);

    assert!(!scheduler.registry().is_connected(&stale.id).await);
    assert!(scheduler.registry().is_connected(&fresh.id).await);
    assert_eq!(stale.drain(), vec![dispatchd::transport::WireFrame::Close]);
    assert!(stale.is_disconnected());
    assert_eq!(scheduler.metrics().snapshot().agents.marked_down, 1);
}

#[tokio::test]
async fn test_stale_agent_without_connection_is_still_marked_down() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let agent = seed_agent(store.as_ref(), "linux", "amd64");
    backdate(store.as_ref(), &agent.id, 600);

    let downed = scheduler.liveness().check().await.unwrap();

    assert_eq!(downed, vec![agent.id]);
    assert_eq!(store.get_agent(&agent.id).unwrap().status, AgentStatus::Down);
}

#[tokio::test]
async fn test_down_agents_are_not_rechecked() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let agent = seed_agent(store.as_ref(), "linux", "amd64");
    backdate(store.as_ref(), &agent.id, 600);

    assert_eq!(scheduler.liveness().check().await.unwrap().len(), 1);
    assert!(scheduler.liveness().check().await.unwrap().is_empty());
    assert_eq!(scheduler.metrics().snapshot().agents.marked_down, 1);
}

#[tokio::test]
async fn test_heartbeat_revives_down_agent() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let mut agent = connect_agent(&scheduler, "linux", "amd64").await;
    store
        .update_agent(&agent.id, &mut |a| a.status = AgentStatus::Down)
        .unwrap();

    agent.heartbeat("linux", "amd64");
    let ack = agent.recv_frame().await.expect("ack");
    assert_eq!(ack.kind, MessageKind::HeartbeatAck);

    assert_eq!(store.get_agent(&agent.id).unwrap().status, AgentStatus::Up);
}

#[tokio::test]
async fn test_running_monitor_stops_on_shutdown() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::new());
    let agent = seed_agent(store.as_ref(), "linux", "amd64");
    backdate(store.as_ref(), &agent.id, 120);

    scheduler.start().await;
    for _ in 0..50 {
        if store.get_agent(&agent.id).unwrap().status == AgentStatus::Down {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    scheduler.shutdown().await;

    assert_eq!(store.get_agent(&agent.id).unwrap().status, AgentStatus::Down);
}

#[tokio::test]
async fn test_peer_that_stops_reading_does_not_stall_the_check() {
    let mut config = test_config();
    config.server.send_timeout_secs = 1;
    let (scheduler, store) = test_scheduler(config, HandlerRegistry::new());
    let agent = seed_agent(store.as_ref(), "linux", "amd64");
    let endpoint = scheduler
        .registry()
        .add_endpoint(agent.id, stalled_channel(), "runner")
        .await
        .unwrap();

    let writer = endpoint.clone();
    let in_flight = tokio::spawn(async move {
        writer
            .write(&HeartbeatAck {
                timestamp: Utc::now(),
            })
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    backdate(store.as_ref(), &agent.id, 120);

    let liveness = scheduler.liveness().clone();
    let check = tokio::spawn(async move { liveness.check().await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let lookup = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        scheduler.registry().is_connected(&agent.id),
    )
    .await;
    assert_eq!(lookup, Ok(false), "registry stays readable while the peer is closed");

    let downed = tokio::time::timeout(std::time::Duration::from_secs(5), check)
        .await
        .expect("liveness check finishes despite the stalled peer")
        .unwrap()
        .unwrap();
    assert_eq!(downed, vec![agent.id]);
    assert_eq!(store.get_agent(&agent.id).unwrap().status, AgentStatus::Down);

    let write = in_flight.await.unwrap();
    assert!(matches!(write, Err(TransportError::SendTimedOut(_))));
    assert!(endpoint.is_closed());
}
