//! Tether Connect: authenticated event delivery over a duplex connection
//!
//! This crate owns the client side of the event stream: it opens the
//! connection, authenticates, and moves events from producers to the wire,
//! holding them in memory while the connection is down.
//!
//! # Architecture
//!
//! - **ConnectionClient**: connection state machine, queueing, batching,
//!   breaker-gated reconnection and heartbeat
//! - **Transport**: seam that turns an endpoint into outbound/event channels;
//!   [`WebSocketTransport`] is the production implementation
//! - **Envelope / InboundSignal**: the JSON wire format
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_connect::{ClientSettings, ConnectionClient, WebSocketTransport};
//!
//! async fn example() -> Result<(), tether_connect::DeliveryError> {
//!     let settings = ClientSettings {
//!         endpoint: "wss://ingest.example.com/events".to_string(),
//!         auth_token: "secret".to_string(),
//!         instance_id: "node-1".to_string(),
//!         ..ClientSettings::default()
//!     };
//!
//!     let client = ConnectionClient::builder(
//!         Arc::new(settings),
//!         Arc::new(WebSocketTransport::default()),
//!     )
//!     .build()?;
//!
//!     client.initialize()?;
//!     client.send_event(r#"{"kind":"deploy","service":"api"}"#);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod settings;
pub mod state;
pub mod transport;
pub mod websocket;

pub use client::{ClientBuilder, ConnectionClient, SendOutcome};
pub use error::{DeliveryError, DeliveryResult};
pub use metrics::{ClientMetrics, ReconnectMetrics};
pub use protocol::{Envelope, InboundSignal};
pub use settings::{AdmissionSettings, ClientSettings, EventFilter, SettingsProvider};
pub use state::ConnectionState;
pub use transport::{OutboundFrame, Transport, TransportEvent, TransportLink};
pub use websocket::WebSocketTransport;
