//! Transport seam between the client and the wire
//!
//! A transport turns an endpoint into a pair of channels: frames flow out
//! through [`TransportLink::outbound`] and everything the connection reports
//! (open, inbound text, close, failure) flows back through
//! [`TransportLink::events`]. The client consumes those events from one
//! driver task per connection, so callbacks are serialized without locks.

use crate::error::{DeliveryError, DeliveryResult};
use tokio::sync::mpsc;

/// Frame handed to the transport's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Close the connection gracefully
    Close,
}

/// What the connection reports back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and ready for AUTH
    Opened,
    /// Inbound text frame
    Message(String),
    /// The remote side closed the connection
    Closed { code: Option<u16>, reason: String },
    /// The connection failed, before or after opening
    Failed(DeliveryError),
}

/// Channels for one connection attempt
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, events }
    }
}

/// Opens connections to an endpoint
///
/// `open` must not block: it starts the connection in the background and
/// reports progress through the returned link. Dropping the link's outbound
/// sender tells the transport to shut the connection down.
pub trait Transport: Send + Sync {
    fn open(&self, endpoint: &str) -> DeliveryResult<TransportLink>;
}
