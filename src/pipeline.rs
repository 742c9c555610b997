/*!
 * Composition root: one client per pipeline, cheap handles for producers
 */

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use tether_connect::{
    ClientMetrics, ClientSettings, ConnectionClient, ConnectionState, DeliveryError, EventFilter,
    SendOutcome, SettingsProvider, Transport, WebSocketTransport,
};

use crate::config::TetherConfig;
use crate::error::{Result, TetherError};
use crate::filter::RegexEventFilter;

/// Settings fixed at construction
#[derive(Debug, Clone)]
pub struct StaticSettingsProvider {
    config: TetherConfig,
}

impl StaticSettingsProvider {
    pub fn new(config: TetherConfig) -> Self {
        Self { config }
    }
}

impl SettingsProvider for StaticSettingsProvider {
    fn settings(&self) -> ClientSettings {
        self.config.client_settings()
    }

    fn is_valid(&self) -> bool {
        self.config.validate().is_empty()
    }
}

/// Settings that can be replaced while the client runs
///
/// The client only re-reads them on `initialize()` and `reconnect()`.
#[derive(Debug, Default)]
pub struct SharedSettingsProvider {
    config: RwLock<TetherConfig>,
}

impl SharedSettingsProvider {
    pub fn new(config: TetherConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> TetherConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new configuration, returning the previous one
    pub fn replace(&self, config: TetherConfig) -> TetherConfig {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, config)
    }
}

impl SettingsProvider for SharedSettingsProvider {
    fn settings(&self) -> ClientSettings {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .client_settings()
    }

    fn is_valid(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .validate()
            .is_empty()
    }
}

/// Event filter whose patterns can be swapped with the configuration
#[derive(Debug, Default)]
struct ReloadableFilter {
    current: RwLock<Option<RegexEventFilter>>,
}

impl ReloadableFilter {
    fn set(&self, filter: Option<RegexEventFilter>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = filter;
    }
}

impl EventFilter for ReloadableFilter {
    fn should_send(&self, payload: &str) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |filter| filter.should_send(payload))
    }
}

/// Errors after which the client has already scheduled another attempt
fn retried_in_background(err: &DeliveryError) -> bool {
    err.is_retryable() || matches!(err, DeliveryError::CircuitOpen)
}

fn build_filter(config: &TetherConfig) -> Result<Option<RegexEventFilter>> {
    if config.filter.is_empty() {
        Ok(None)
    } else {
        RegexEventFilter::from_config(&config.filter).map(Some)
    }
}

/// Cloneable handle producers use to emit events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    client: ConnectionClient,
}

impl EventPublisher {
    /// Emit a raw payload; never blocks on the network
    pub fn publish(&self, payload: impl Into<String>) -> SendOutcome {
        self.client.send_event(payload)
    }

    /// Serialize `event` to JSON and emit it
    pub fn publish_json<T: Serialize>(&self, event: &T) -> Result<SendOutcome> {
        let payload = serde_json::to_string(event)
            .map_err(|e| TetherError::Other(format!("Failed to serialize event: {}", e)))?;
        Ok(self.client.send_event(payload))
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

/// Owns the connection client and its configuration
#[derive(Debug)]
pub struct EventPipeline {
    client: ConnectionClient,
    provider: Arc<SharedSettingsProvider>,
    filter: Arc<ReloadableFilter>,
}

impl EventPipeline {
    /// Build a pipeline that delivers over WebSocket
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: TetherConfig) -> Result<Self> {
        let transport = Arc::new(WebSocketTransport::new(config.connect_timeout()));
        Self::with_transport(config, transport)
    }

    /// Build a pipeline over any transport
    pub fn with_transport(config: TetherConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.ensure_valid()?;

        let filter = Arc::new(ReloadableFilter::default());
        filter.set(build_filter(&config)?);
        let provider = Arc::new(SharedSettingsProvider::new(config));

        let client = ConnectionClient::builder(provider.clone(), transport)
            .filter(filter.clone())
            .build()?;

        Ok(Self {
            client,
            provider,
            filter,
        })
    }

    /// Start delivering
    ///
    /// A failed first attempt that will be retried in the background is
    /// logged, not returned.
    pub fn initialize(&self) -> Result<()> {
        match self.client.initialize() {
            Ok(()) => {
                info!(
                    state = %self.client.state(),
                    instance_id = %self.provider.config().connection.instance_id,
                    "Event pipeline started"
                );
                Ok(())
            }
            Err(err) if retried_in_background(&err) => {
                warn!(error = %err, "First connection attempt failed, retrying in background");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            client: self.client.clone(),
        }
    }

    /// Validate and apply a new configuration, then reconnect with it
    ///
    /// Queue capacity is fixed when the pipeline is built; a different value
    /// is ignored with a warning.
    pub fn update_config(&self, config: TetherConfig) -> Result<()> {
        config.ensure_valid()?;
        let filter = build_filter(&config)?;

        let fixed_capacity = self.client.queue_metrics().max_size;
        if config.queue.capacity != fixed_capacity {
            warn!(
                requested = config.queue.capacity,
                capacity = fixed_capacity,
                "Queue capacity cannot change at runtime; keeping the current size"
            );
        }
        self.provider.replace(config);
        self.filter.set(filter);

        match self.client.reconnect() {
            Ok(()) => Ok(()),
            Err(err) if retried_in_background(&err) => {
                warn!(error = %err, "Reconnect after config update failed, retrying in background");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn config(&self) -> TetherConfig {
        self.provider.config()
    }

    pub fn client(&self) -> &ConnectionClient {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn metrics(&self) -> ClientMetrics {
        self.client.metrics()
    }

    /// Flush the pending batch and close the connection
    pub fn close(&self) {
        self.client.close();
        info!("Event pipeline closed");
    }
}
