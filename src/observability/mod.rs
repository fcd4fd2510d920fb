//! Structured logging and scheduler metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{MetricsCollector, MetricsSnapshot};

pub use logging::{agent_span, sweep_span, task_span};
