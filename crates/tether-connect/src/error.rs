//! Error types for the tether-connect crate

use thiserror::Error;

/// Failure classes surfaced by the connection client
///
/// Every failure the client observes is mapped onto one of these variants
/// before it reaches the reconnection logic. The variant decides whether the
/// client retries on its own (see [`DeliveryError::is_retryable`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Event sending failed: {0}")]
    EventSending(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The remote identity did not match what the client trusts
    #[error("Certificate verification failed: {0}")]
    CertificatePinning(String),

    #[error("Circuit breaker is open, connection attempt refused")]
    CircuitOpen,

    #[error("Not connected")]
    NotConnected,

    #[error("Client has been closed")]
    Closed,

    #[error("Client must be used inside a tokio runtime")]
    NoRuntime,
}

impl DeliveryError {
    /// Whether the client should schedule a reconnect after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Connection(_)
                | DeliveryError::Authentication(_)
                | DeliveryError::Network(_)
                | DeliveryError::Server(_)
                | DeliveryError::EventSending(_)
                | DeliveryError::NotConnected
        )
    }

    /// Certificate failures halt automatic reconnection until a manual reconnect
    pub fn is_certificate_failure(&self) -> bool {
        matches!(self, DeliveryError::CertificatePinning(_))
    }

    /// Map a transport-level failure description onto a failure class
    ///
    /// TLS stacks report certificate problems as free-form text, so this
    /// falls back to matching on the message.
    pub fn from_transport_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("certificate") || lowered.contains("pinning") {
            DeliveryError::CertificatePinning(message)
        } else if lowered.contains("unauthorized") || lowered.contains("forbidden") {
            DeliveryError::Authentication(message)
        } else {
            DeliveryError::Connection(message)
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        DeliveryError::EventSending(format!("failed to encode envelope: {}", err))
    }
}

/// Result type alias using DeliveryError
pub type DeliveryResult<T> = Result<T, DeliveryError>;
