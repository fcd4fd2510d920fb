//! HTTP and WebSocket route tests using warp's in-process test client

use dispatchd::handlers::HandlerRegistry;
use dispatchd::model::{Agent, Task, TaskStatus};
use dispatchd::protocol::{Frame, Heartbeat, MessageKind};
use dispatchd::server::routes;
use dispatchd::testing::{test_config, test_scheduler};
use serde_json::{json, Value};
use uuid::Uuid;
use warp::http::StatusCode;

const WS_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

fn upgrade_request(agent_id: Option<&str>) -> warp::test::RequestBuilder {
    let request = warp::test::request()
        .method("GET")
        .path("/agents/connect")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", WS_KEY);
    match agent_id {
        Some(id) => request.header("x-agent-id", id),
        None => request,
    }
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("response body is JSON")
}

fn heartbeat_text() -> String {
    Frame::from_message(&Heartbeat {
        user: "ci".to_string(),
        hostname: "builder-01".to_string(),
        ip: "10.0.0.7".to_string(),
        os_type: "linux".to_string(),
        architecture: "amd64".to_string(),
    })
    .and_then(|frame| frame.encode())
    .unwrap()
}

#[tokio::test]
async fn test_create_task_returns_created_ready_task() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let api = routes(scheduler);

    let response = warp::test::request()
        .method("POST")
        .path("/tasks")
        .json(&json!({
            "os_type": "linux",
            "command": "make test",
            "response_handler": "echo",
            "exec_timeout": 90,
            "labels": {"build": "1234"}
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let task: Task = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert_eq!(task.exec_timeout, 90);
    assert_eq!(store.task_count(), 1);
}

#[tokio::test]
async fn test_create_task_without_command_is_bad_request() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let api = routes(scheduler);

    let response = warp::test::request()
        .method("POST")
        .path("/tasks")
        .json(&json!({"response_handler": "echo"}))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.body());
    assert!(body["error"].as_str().unwrap().contains("command is empty"));
    assert_eq!(store.task_count(), 0);
}

#[tokio::test]
async fn test_get_task_and_missing_task() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let task = scheduler
        .service()
        .create_task(
            dispatchd::model::TaskBuilder::new()
                .command("true")
                .response_handler("echo"),
        )
        .unwrap();
    let api = routes(scheduler);

    let found = warp::test::request()
        .path(&format!("/tasks/{}", task.id))
        .reply(&api)
        .await;
    assert_eq!(found.status(), StatusCode::OK);
    let fetched: Task = serde_json::from_slice(found.body()).unwrap();
    assert_eq!(fetched.id, task.id);

    let missing = warp::test::request()
        .path(&format!("/tasks/{}", Uuid::new_v4()))
        .reply(&api)
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let no_response = warp::test::request()
        .path(&format!("/tasks/{}/response", task.id))
        .reply(&api)
        .await;
    assert_eq!(no_response.status(), StatusCode::NOT_FOUND);
    let body = body_json(no_response.body());
    assert_eq!(
        body["error"],
        format!("task {} has no response yet", task.id)
    );

    let unknown_response = warp::test::request()
        .path(&format!("/responses/{}", Uuid::new_v4()))
        .reply(&api)
        .await;
    assert_eq!(unknown_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_tasks_pages() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    for _ in 0..3 {
        scheduler
            .service()
            .create_task(
                dispatchd::model::TaskBuilder::new()
                    .command("true")
                    .response_handler("echo"),
            )
            .unwrap();
    }
    let api = routes(scheduler);

    let all = warp::test::request().path("/tasks").reply(&api).await;
    assert_eq!(all.status(), StatusCode::OK);
    let body = body_json(all.body());
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);

    let page = warp::test::request()
        .path("/tasks?offset=2&limit=5")
        .reply(&api)
        .await;
    let body = body_json(page.body());
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["offset"], 2);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let api = routes(scheduler);

    let health = warp::test::request().path("/health").reply(&api).await;
    assert_eq!(health.status(), StatusCode::OK);
    let body = body_json(health.body());
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connected_agents"], 0);

    let metrics = warp::test::request().path("/metrics").reply(&api).await;
    assert_eq!(metrics.status(), StatusCode::OK);
    let body = body_json(metrics.body());
    assert_eq!(body["tasks"]["created"], 0);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_connect_rejects_bad_agent_id_before_upgrade() {
    let (scheduler, _store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let api = routes(scheduler.clone());

    let missing = upgrade_request(None).reply(&api).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let short = upgrade_request(Some("agent-7")).reply(&api).await;
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
    let body = body_json(short.body());
    assert!(body["error"].as_str().unwrap().contains("36"));

    assert!(scheduler.registry().is_empty().await);
}

#[tokio::test]
async fn test_agent_connects_heartbeats_and_duplicate_is_refused() {
    let (scheduler, store) = test_scheduler(test_config(), HandlerRegistry::with_builtins());
    let api = routes(scheduler.clone());
    let agent_id = Uuid::new_v4();

    let mut client = warp::test::ws()
        .path("/agents/connect")
        .header("x-agent-id", agent_id.to_string())
        .handshake(api.clone())
        .await
        .expect("handshake succeeds");

    client.send_text(heartbeat_text()).await;
    let reply = client.recv().await.expect("ack received");
    let frame = Frame::decode(reply.to_str().expect("text frame")).unwrap();
    assert_eq!(frame.kind, MessageKind::HeartbeatAck);

    let agent: Agent = store_agent(&store, &agent_id);
    assert_eq!(agent.hostname, "builder-01");
    assert!(scheduler.registry().is_connected(&agent_id).await);

    let duplicate = upgrade_request(Some(&agent_id.to_string()))
        .reply(&api)
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let agents = warp::test::request().path("/agents").reply(&api).await;
    let body = body_json(agents.body());
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["status"], "up");
}

fn store_agent(store: &dispatchd::store::MemoryStore, agent_id: &Uuid) -> Agent {
    use dispatchd::store::Store;
    store.get_agent(agent_id).expect("agent registered by heartbeat")
}
