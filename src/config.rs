//! Scheduler configuration
//!
//! Loaded from a TOML file with three optional sections. Every field has a
//! default, so an empty file (or no file at all) yields a working setup:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8080
//! send_timeout_secs = 10
//!
//! [scheduler]
//! sweep_interval_secs = 10
//! worker_count = 4
//! timeout_grace_secs = 30
//! retention_secs = 604800
//! claim_recovery_secs = 300
//!
//! [liveness]
//! check_interval_secs = 60
//! keepalive_timeout_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Files probed, in order, when no path is given on the command line
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["dispatchd.toml", "config/dispatchd.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub scheduler: PipelineSection,
    #[serde(default)]
    pub liveness: LivenessSection,
}

/// HTTP and agent channel listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
    /// Bound on a single outbound frame write or channel close
    pub send_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            send_timeout_secs: 10,
        }
    }
}

impl ServerSection {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Processing pipeline timing and parallelism
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
    /// Upper bound on workers spawned per sweep
    pub worker_count: usize,
    /// Added to a task's exec_timeout before it is declared timed out
    pub timeout_grace_secs: u64,
    /// Age after which finished tasks and their responses are deleted
    pub retention_secs: u64,
    /// Age after which an abandoned claim is released
    pub claim_recovery_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 10,
            worker_count: 4,
            timeout_grace_secs: 30,
            retention_secs: 7 * 24 * 60 * 60,
            claim_recovery_secs: 300,
        }
    }
}

impl PipelineSection {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn timeout_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.timeout_grace_secs))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.retention_secs))
    }

    pub fn claim_recovery(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.claim_recovery_secs))
    }
}

/// Agent heartbeat supervision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessSection {
    pub check_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            keepalive_timeout_secs: 60,
        }
    }
}

impl LivenessSection {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn keepalive_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.keepalive_timeout_secs))
    }
}

/// Keep second counts inside the range chrono accepts
fn clamp_secs(secs: u64) -> i64 {
    const MAX: u64 = 100 * 365 * 24 * 60 * 60;
    secs.min(MAX) as i64
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SchedulerConfig {
    /// Load and validate a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given, else the first default path that exists,
    /// else built-in defaults. Returns the path that was used, if any.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
            }
        }

        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.worker_count == 0 {
            return Err(invalid("scheduler.worker_count must be at least 1"));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(invalid("scheduler.sweep_interval_secs must be greater than 0"));
        }
        if self.scheduler.claim_recovery_secs == 0 {
            return Err(invalid("scheduler.claim_recovery_secs must be greater than 0"));
        }
        if self.liveness.check_interval_secs == 0 {
            return Err(invalid("liveness.check_interval_secs must be greater than 0"));
        }
        if self.liveness.keepalive_timeout_secs == 0 {
            return Err(invalid("liveness.keepalive_timeout_secs must be greater than 0"));
        }
        if self.server.send_timeout_secs == 0 {
            return Err(invalid("server.send_timeout_secs must be greater than 0"));
        }
        if self.server.bind_address.is_empty() {
            return Err(invalid("server.bind_address must not be empty"));
        }
        Ok(())
    }

    /// Render as TOML, for `dispatchd config --show`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| invalid(e.to_string()))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}
