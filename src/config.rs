/*!
 * Configuration types for Tether
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_connect::{AdmissionSettings, ClientSettings};
use tether_core_queue::BatcherConfig;
use tether_core_resilience::{BackoffConfig, CircuitBreakerConfig};

use crate::error::{Result, TetherError};

/// Environment variable overriding `connection.endpoint`
pub const ENV_ENDPOINT: &str = "TETHER_ENDPOINT";
/// Environment variable overriding `connection.auth_token`
pub const ENV_TOKEN: &str = "TETHER_TOKEN";
/// Environment variable overriding `connection.instance_id`
pub const ENV_INSTANCE_ID: &str = "TETHER_INSTANCE_ID";
/// Environment variable overriding `connection.enabled`
pub const ENV_ENABLED: &str = "TETHER_ENABLED";

/// Main configuration, one table per concern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where to connect and how to identify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Token presented in the AUTH envelope
    #[serde(default)]
    pub auth_token: String,

    /// Identifier of this process on the server side
    #[serde(default)]
    pub instance_id: String,

    /// Connect at all (false keeps events in the queue)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat interval in seconds (0 = disabled)
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Timeout for opening the transport, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: String::new(),
            instance_id: String::new(),
            enabled: true,
            heartbeat_interval_secs: default_heartbeat_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Events held while disconnected; the oldest is dropped beyond this
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,

    /// Maximum wait before a partial batch is sent, in milliseconds
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: default_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before trial attempts
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,

    /// Trial attempts permitted while half-open
    #[serde(default = "default_half_open_attempts")]
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
            half_open_max_attempts: default_half_open_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Sliding-window admission limit for producers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Events admitted per window (0 = unlimited)
    #[serde(default)]
    pub max_events: u32,

    #[serde(default = "default_admission_window_ms")]
    pub window_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_events: 0,
            window_ms: default_admission_window_ms(),
        }
    }
}

/// Regex filter applied to raw event payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// If non-empty, an event must match at least one
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// An event matching any of these is dropped
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include_patterns.is_empty() && self.exclude_patterns.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// One problem found by [`TetherConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Dotted path of the offending field, e.g. `queue.capacity`
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_timeout_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

fn default_half_open_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_admission_window_ms() -> u64 {
    1000
}

impl TetherConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TetherConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `TETHER_*` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.connection.endpoint = endpoint;
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.connection.auth_token = token;
        }
        if let Some(instance_id) = lookup(ENV_INSTANCE_ID) {
            self.connection.instance_id = instance_id;
        }
        if let Some(enabled) = lookup(ENV_ENABLED) {
            match parse_bool(&enabled) {
                Some(enabled) => self.connection.enabled = enabled,
                None => tracing::warn!(
                    variable = ENV_ENABLED,
                    value = %enabled,
                    "Ignoring unparseable boolean override"
                ),
            }
        }
    }

    /// Check every field and report all problems at once
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let endpoint = self.connection.endpoint.trim();
        if endpoint.is_empty() {
            issues.push(ConfigIssue::new("connection.endpoint", "must not be empty"));
        } else {
            match url::Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
                Ok(url) => issues.push(ConfigIssue::new(
                    "connection.endpoint",
                    format!("scheme must be ws or wss, got {}", url.scheme()),
                )),
                Err(e) => issues.push(ConfigIssue::new(
                    "connection.endpoint",
                    format!("not a valid URL: {}", e),
                )),
            }
        }

        if self.connection.auth_token.is_empty() {
            issues.push(ConfigIssue::new("connection.auth_token", "must not be empty"));
        }
        if self.connection.instance_id.trim().is_empty() {
            issues.push(ConfigIssue::new("connection.instance_id", "must not be empty"));
        }
        if self.queue.capacity == 0 {
            issues.push(ConfigIssue::new("queue.capacity", "must be greater than zero"));
        }
        if self.batching.max_batch_size == 0 {
            issues.push(ConfigIssue::new(
                "batching.max_batch_size",
                "must be greater than zero",
            ));
        }
        if self.batching.flush_timeout_ms == 0 {
            issues.push(ConfigIssue::new(
                "batching.flush_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            issues.push(ConfigIssue::new(
                "breaker.failure_threshold",
                "must be greater than zero",
            ));
        }
        if self.breaker.half_open_max_attempts == 0 {
            issues.push(ConfigIssue::new(
                "breaker.half_open_max_attempts",
                "must be greater than zero",
            ));
        }
        if !(self.reconnect.multiplier >= 1.0 && self.reconnect.multiplier.is_finite()) {
            issues.push(ConfigIssue::new(
                "reconnect.multiplier",
                format!("must be at least 1.0, got {}", self.reconnect.multiplier),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            issues.push(ConfigIssue::new(
                "reconnect.max_delay_ms",
                "must not be smaller than initial_delay_ms",
            ));
        }
        if self.admission.max_events > 0 && self.admission.window_ms == 0 {
            issues.push(ConfigIssue::new(
                "admission.window_ms",
                "must be greater than zero when max_events is set",
            ));
        }
        for pattern in self
            .filter
            .include_patterns
            .iter()
            .chain(&self.filter.exclude_patterns)
        {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue::new(
                    "filter",
                    format!("invalid pattern {:?}: {}", pattern, e),
                ));
            }
        }

        issues
    }

    /// `validate()` as a `Result`
    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(TetherError::InvalidConfig(issues))
        }
    }

    /// Settings handed to the connection client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint: self.connection.endpoint.trim().to_string(),
            auth_token: self.connection.auth_token.clone(),
            instance_id: self.connection.instance_id.trim().to_string(),
            enabled: self.connection.enabled,
            queue_capacity: self.queue.capacity,
            batching_enabled: self.batching.enabled,
            batcher: BatcherConfig {
                max_batch_size: self.batching.max_batch_size,
                flush_timeout: Duration::from_millis(self.batching.flush_timeout_ms),
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                timeout: Duration::from_secs(self.breaker.timeout_secs),
                half_open_max_attempts: self.breaker.half_open_max_attempts,
            },
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                multiplier: self.reconnect.multiplier,
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            },
            heartbeat_interval: Duration::from_secs(self.connection.heartbeat_interval_secs),
            admission: (self.admission.max_events > 0).then(|| AdmissionSettings {
                max_events: self.admission.max_events,
                window: Duration::from_millis(self.admission.window_ms),
            }),
        }
    }

    /// Timeout for opening the transport
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    /// Default location: `$XDG_CONFIG_HOME/tether/tether.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tether").join("tether.toml"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
