//! HTTP and WebSocket front end
//!
//! - `GET  /agents/connect` - agent channel upgrade, identified by `X-Agent-Id`
//! - `POST /tasks` - create a task
//! - `GET  /tasks?offset=&limit=` - page through tasks
//! - `GET  /tasks/{id}` - one task
//! - `GET  /tasks/{id}/response` - the response linked to a task
//! - `GET  /responses/{id}` - one response by its own id
//! - `GET  /agents?offset=&limit=` - page through agents
//! - `GET  /health` - liveness probe with connection count
//! - `GET  /metrics` - counters snapshot

use crate::error::SchedulerError;
use crate::protocol::{parse_agent_id, AGENT_ID_HEADER, AGENT_USER_HEADER};
use crate::scheduler::Scheduler;
use crate::service::{NewTask, Page};
use crate::transport::{Channel, TransportError, WireFrame};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    connected_agents: usize,
    timestamp: chrono::DateTime<chrono::Utc>,
}

fn with_scheduler(
    scheduler: Arc<Scheduler>,
) -> impl Filter<Extract = (Arc<Scheduler>,), Error = Infallible> + Clone {
    warp::any().map(move || scheduler.clone())
}

/// All routes served by the scheduler
pub fn routes(
    scheduler: Arc<Scheduler>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let connect = warp::path!("agents" / "connect")
        .and(warp::get())
        .and(warp::header::optional::<String>(AGENT_ID_HEADER))
        .and(warp::header::optional::<String>(AGENT_USER_HEADER))
        .and(warp::ws())
        .and(with_scheduler(scheduler.clone()))
        .then(accept_agent);

    let create_task = warp::path!("tasks")
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json::<NewTask>())
        .and(with_scheduler(scheduler.clone()))
        .map(|request: NewTask, scheduler: Arc<Scheduler>| {
            match scheduler.service().submit(request) {
                Ok(task) => json_with_status(&task, StatusCode::CREATED),
                Err(e) => error_reply(&e),
            }
        });

    let list_tasks = warp::path!("tasks")
        .and(warp::get())
        .and(warp::query::<Page>())
        .and(with_scheduler(scheduler.clone()))
        .map(|page: Page, scheduler: Arc<Scheduler>| {
            respond(scheduler.service().list_tasks(page))
        });

    let get_task = warp::path!("tasks" / Uuid)
        .and(warp::get())
        .and(with_scheduler(scheduler.clone()))
        .map(|id: Uuid, scheduler: Arc<Scheduler>| respond(scheduler.service().get_task(&id)));

    let get_task_response = warp::path!("tasks" / Uuid / "response")
        .and(warp::get())
        .and(with_scheduler(scheduler.clone()))
        .map(|id: Uuid, scheduler: Arc<Scheduler>| {
            respond(scheduler.service().get_task_response(&id))
        });

    let get_response = warp::path!("responses" / Uuid)
        .and(warp::get())
        .and(with_scheduler(scheduler.clone()))
        .map(|id: Uuid, scheduler: Arc<Scheduler>| {
            respond(scheduler.service().get_response(&id))
        });

    let list_agents = warp::path!("agents")
        .and(warp::get())
        .and(warp::query::<Page>())
        .and(with_scheduler(scheduler.clone()))
        .map(|page: Page, scheduler: Arc<Scheduler>| {
            respond(scheduler.service().list_agents(page))
        });

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_scheduler(scheduler.clone()))
        .then(|scheduler: Arc<Scheduler>| async move {
            let body = HealthBody {
                status: "healthy",
                connected_agents: scheduler.registry().len().await,
                timestamp: chrono::Utc::now(),
            };
            warp::reply::json(&body).into_response()
        });

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_scheduler(scheduler))
        .map(|scheduler: Arc<Scheduler>| {
            warp::reply::json(&scheduler.metrics().snapshot()).into_response()
        });

    connect
        .or(create_task)
        .unify()
        .or(list_tasks)
        .unify()
        .or(get_task)
        .unify()
        .or(get_task_response)
        .unify()
        .or(get_response)
        .unify()
        .or(list_agents)
        .unify()
        .or(health)
        .unify()
        .or(metrics)
        .unify()
}

/// Validate the handshake headers, then upgrade and register the channel.
///
/// A malformed id is answered with 400 and an id that already holds a live
/// connection with 409, both before the upgrade.
async fn accept_agent(
    agent_id: Option<String>,
    user: Option<String>,
    ws: Ws,
    scheduler: Arc<Scheduler>,
) -> Response {
    let agent_id = match parse_agent_id(agent_id.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Rejecting agent connection");
            let err = TransportError::InvalidAgentId(e);
            return json_with_status(&ErrorBody { error: err.to_string() }, StatusCode::BAD_REQUEST);
        }
    };

    if scheduler.registry().is_connected(&agent_id).await {
        warn!(%agent_id, "Rejecting duplicate agent connection");
        let err = TransportError::AlreadyConnected(agent_id);
        return json_with_status(&ErrorBody { error: err.to_string() }, StatusCode::CONFLICT);
    }

    let user = user.unwrap_or_default();
    ws.on_upgrade(move |socket| async move {
        let channel = websocket_channel(socket);
        match scheduler.registry().add_endpoint(agent_id, channel, user).await {
            Ok(_) => info!(%agent_id, "Agent channel open"),
            Err(e) => warn!(%agent_id, error = %e, "Agent channel refused after upgrade"),
        }
    })
    .into_response()
}

/// Adapt a WebSocket into the transport's frame channel.
///
/// Ping, pong and binary messages are not part of the protocol and are
/// skipped.
pub fn websocket_channel(socket: WebSocket) -> Channel {
    let (tx, rx) = socket.split();

    let sink = tx
        .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
        .with(|frame: WireFrame| async move {
            Ok::<_, TransportError>(match frame {
                WireFrame::Text(text) => Message::text(text),
                WireFrame::Close => Message::close(),
            })
        });

    let stream = rx.filter_map(|item| async move {
        match item {
            Ok(message) if message.is_close() => Some(Ok(WireFrame::Close)),
            Ok(message) => message
                .to_str()
                .ok()
                .map(|text| Ok(WireFrame::Text(text.to_string()))),
            Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
        }
    });

    Channel::new(Box::pin(sink), Box::pin(stream))
}

fn respond<T: Serialize>(result: Result<T, SchedulerError>) -> Response {
    match result {
        Ok(value) => json_with_status(&value, StatusCode::OK),
        Err(e) => error_reply(&e),
    }
}

fn json_with_status<T: Serialize>(value: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

fn status_for(error: &SchedulerError) -> StatusCode {
    match error {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        SchedulerError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
        SchedulerError::Transport(TransportError::AlreadyConnected(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(error: &SchedulerError) -> Response {
    json_with_status(
        &ErrorBody {
            error: error.to_string(),
        },
        status_for(error),
    )
}

/// Bind `addr` and serve until `shutdown` resolves
pub fn serve(
    scheduler: Arc<Scheduler>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    let routes = routes(scheduler).with(warp::trace::request());
    warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)
}
