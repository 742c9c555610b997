//! Client settings and the host-supplied seams (settings provider, event filter)

use crate::error::DeliveryError;
use std::time::Duration;
use tether_core_queue::BatcherConfig;
use tether_core_resilience::{BackoffConfig, CircuitBreakerConfig};

/// Sliding-window admission limits for `send_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    pub max_events: u32,
    pub window: Duration,
}

/// Everything the client needs to connect and deliver
///
/// Read from the [`SettingsProvider`] on `initialize()` and `reconnect()`.
#[derive(Clone, PartialEq)]
pub struct ClientSettings {
    /// `ws://` or `wss://` URL of the ingestion endpoint
    pub endpoint: String,
    pub auth_token: String,
    pub instance_id: String,
    /// When false, `initialize()` succeeds without connecting
    pub enabled: bool,
    pub queue_capacity: usize,
    pub batching_enabled: bool,
    pub batcher: BatcherConfig,
    pub breaker: CircuitBreakerConfig,
    pub backoff: BackoffConfig,
    /// Zero disables the heartbeat
    pub heartbeat_interval: Duration,
    pub admission: Option<AdmissionSettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: String::new(),
            instance_id: String::new(),
            enabled: true,
            queue_capacity: 1000,
            batching_enabled: true,
            batcher: BatcherConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            admission: None,
        }
    }
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &"<redacted>")
            .field("instance_id", &self.instance_id)
            .field("enabled", &self.enabled)
            .field("queue_capacity", &self.queue_capacity)
            .field("batching_enabled", &self.batching_enabled)
            .field("batcher", &self.batcher)
            .field("breaker", &self.breaker)
            .field("backoff", &self.backoff)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("admission", &self.admission)
            .finish()
    }
}

impl ClientSettings {
    /// Minimal checks the client cannot run without
    ///
    /// Richer validation (URL syntax, scheme) belongs to whoever builds the
    /// settings.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let problem = if self.endpoint.trim().is_empty() {
            Some("endpoint is empty")
        } else if self.auth_token.is_empty() {
            Some("auth token is empty")
        } else if self.instance_id.trim().is_empty() {
            Some("instance id is empty")
        } else if self.queue_capacity == 0 {
            Some("queue capacity must be greater than zero")
        } else if self.batching_enabled && self.batcher.max_batch_size == 0 {
            Some("batch size must be greater than zero")
        } else {
            None
        };

        match problem {
            Some(problem) => Err(DeliveryError::Configuration(problem.to_string())),
            None => Ok(()),
        }
    }
}

/// Source of client settings, consulted on `initialize()` and `reconnect()`
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> ClientSettings;

    fn is_valid(&self) -> bool {
        self.settings().validate().is_ok()
    }
}

impl SettingsProvider for ClientSettings {
    fn settings(&self) -> ClientSettings {
        self.clone()
    }
}

/// Optional predicate deciding whether an event is sent at all
///
/// Rejected events are dropped silently and only counted.
pub trait EventFilter: Send + Sync {
    fn should_send(&self, payload: &str) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_send(&self, payload: &str) -> bool {
        self(payload)
    }
}
