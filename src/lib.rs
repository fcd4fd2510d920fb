//! dispatchd - remote execution scheduler
//!
//! Keeps live WebSocket connections to a pool of worker agents, assigns
//! submitted tasks to a suitable agent by OS type, architecture and load,
//! delivers them, collects results and drives every task through a bounded
//! lifecycle with timeouts and garbage collection.
//!
//! # Overview
//!
//! - [`model`] - agent, task and response records
//! - [`store`] - storage seam and the in-memory store
//! - [`protocol`] - frames exchanged with agents
//! - [`transport`] - live agent connections and inbound routing
//! - [`scheduler`] - dispatch, processing pipeline, liveness and the
//!   [`Scheduler`] composition root
//! - [`handlers`] - named post-processing of agent output
//! - [`service`] - task intake for collaborators
//! - [`server`] - HTTP and WebSocket routes
//!
//! # Quick Start
//!
//! ```rust
//! use dispatchd::handlers::HandlerRegistry;
//! use dispatchd::model::{TaskBuilder, TaskStatus};
//! use dispatchd::store::MemoryStore;
//! use dispatchd::{Scheduler, SchedulerConfig};
//! use std::sync::Arc;
//!
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     HandlerRegistry::with_builtins(),
//! )
//! .unwrap();
//!
//! let task = scheduler
//!     .service()
//!     .create_task(
//!         TaskBuilder::new()
//!             .os_type("linux")
//!             .architecture("amd64")
//!             .command("make test")
//!             .response_handler("echo")
//!             .exec_timeout(300),
//!     )
//!     .unwrap();
//!
//! assert_eq!(task.status, TaskStatus::Ready);
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod store;
pub mod testing;
pub mod transport;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use model::{Agent, Task, TaskBuilder, TaskResponse, TaskStatus};
pub use scheduler::Scheduler;
pub use service::TaskService;
pub use store::{MemoryStore, Store};
