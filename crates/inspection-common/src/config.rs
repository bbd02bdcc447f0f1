//! Configuration file support for the inspection daemons.
//!
//! Loads and validates configuration from TOML. Every field is optional and
//! falls back to the defaults below.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::exports::{INSPECTION_ROUTE_TABLE_EXPORT, WORKLOAD_ROUTE_TABLE_EXPORT};
use crate::retry::RetryPolicy;

/// Retry sequences one lifecycle request can run back to back: endpoint
/// lookup, route table read, route write, and the old route's removal on an
/// Update that moves the key.
pub const LIFECYCLE_RETRY_SEQUENCES: u32 = 4;

/// Retry sequences one attachment event can run back to back besides the
/// settle wait: association export, disassociate, disassociate poll,
/// associate, propagation export, enable propagation.
pub const ASSOCIATOR_RETRY_SEQUENCES: u32 = 6;

/// Share of an external timeout a handler may use before giving up on its
/// own, leaving the rest for reporting the failure.
const DEADLINE_FRACTION: f64 = 0.9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// What a Create/Update does when the firewall has no endpoint in the
/// subnet's AZ yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEndpointPolicy {
    /// Poll with the retry policy; fail once it is exhausted.
    #[default]
    Wait,
    /// Fail immediately.
    Fail,
    /// Report success without creating the route.
    Skip,
}

/// Provisioning lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Timeout the provisioning system applies to one request
    #[serde(default = "default_provisioning_timeout")]
    pub provisioning_timeout_secs: u64,

    #[serde(default)]
    pub missing_endpoint: MissingEndpointPolicy,
}

/// Export names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportsConfig {
    #[serde(default = "default_workload_export")]
    pub workload_route_table: String,

    #[serde(default = "default_inspection_export")]
    pub inspection_route_table: String,
}

/// Route table a workload attachment propagates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPropagation {
    /// The table it was just associated with.
    #[default]
    Association,
    /// The inspection table, so return traffic from the firewall finds it.
    Inspection,
}

/// Attachment associator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatorConfig {
    /// How long to wait for an attachment to leave a transitional state
    #[serde(default = "default_attachment_timeout")]
    pub attachment_timeout_secs: u64,

    /// Timeout the event bus target applies to one event
    #[serde(default = "default_event_timeout")]
    pub event_timeout_secs: u64,

    #[serde(default)]
    pub workload_propagation: WorkloadPropagation,
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub exports: ExportsConfig,

    #[serde(default)]
    pub associator: AssociatorConfig,
}

// Default functions
fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_provisioning_timeout() -> u64 {
    20
}

fn default_workload_export() -> String {
    WORKLOAD_ROUTE_TABLE_EXPORT.to_string()
}

fn default_inspection_export() -> String {
    INSPECTION_ROUTE_TABLE_EXPORT.to_string()
}

fn default_attachment_timeout() -> u64 {
    60
}

fn default_event_timeout() -> u64 {
    900
}

// Default implementations
impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout_secs: default_provisioning_timeout(),
            missing_endpoint: MissingEndpointPolicy::default(),
        }
    }
}

impl Default for ExportsConfig {
    fn default() -> Self {
        Self {
            workload_route_table: default_workload_export(),
            inspection_route_table: default_inspection_export(),
        }
    }
}

impl Default for AssociatorConfig {
    fn default() -> Self {
        Self {
            attachment_timeout_secs: default_attachment_timeout(),
            event_timeout_secs: default_event_timeout(),
            workload_propagation: WorkloadPropagation::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

impl LifecycleConfig {
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_secs)
    }

    /// Time one request may run before it reports failure on its own.
    pub fn request_deadline(&self) -> Duration {
        self.provisioning_timeout().mul_f64(DEADLINE_FRACTION)
    }
}

impl AssociatorConfig {
    pub fn attachment_timeout(&self) -> Duration {
        Duration::from_secs(self.attachment_timeout_secs)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    /// Time one event may run before it reports failure on its own.
    pub fn event_deadline(&self) -> Duration {
        self.event_timeout().mul_f64(DEADLINE_FRACTION)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }

        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be >= 1.0"));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if self.exports.workload_route_table.trim().is_empty() {
            return Err(ConfigError::invalid("exports.workload_route_table", "must not be empty"));
        }

        if self.exports.inspection_route_table.trim().is_empty() {
            return Err(ConfigError::invalid(
                "exports.inspection_route_table",
                "must not be empty",
            ));
        }

        let budget = self.retry_policy().worst_case_budget();

        let request_budget = budget * LIFECYCLE_RETRY_SEQUENCES;
        if request_budget >= self.lifecycle.provisioning_timeout() {
            return Err(ConfigError::invalid(
                "lifecycle.provisioning_timeout_secs",
                format!(
                    "worst-case retry budget of one request {:?} ({} x {:?}) must be below the provisioning timeout {:?}",
                    request_budget,
                    LIFECYCLE_RETRY_SEQUENCES,
                    budget,
                    self.lifecycle.provisioning_timeout()
                ),
            ));
        }

        if budget >= self.associator.attachment_timeout() {
            return Err(ConfigError::invalid(
                "associator.attachment_timeout_secs",
                format!(
                    "worst-case retry budget {:?} must be below the attachment timeout {:?}",
                    budget,
                    self.associator.attachment_timeout()
                ),
            ));
        }

        let event_budget =
            self.associator.attachment_timeout() + budget * ASSOCIATOR_RETRY_SEQUENCES;
        if event_budget >= self.associator.event_timeout() {
            return Err(ConfigError::invalid(
                "associator.event_timeout_secs",
                format!(
                    "worst-case time of one event {:?} (attachment timeout + {} x {:?}) must be below the event timeout {:?}",
                    event_budget,
                    ASSOCIATOR_RETRY_SEQUENCES,
                    budget,
                    self.associator.event_timeout()
                ),
            ));
        }

        Ok(())
    }
}
