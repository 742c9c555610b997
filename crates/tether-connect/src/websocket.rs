//! WebSocket transport over tokio-tungstenite

use crate::error::{DeliveryError, DeliveryResult};
use crate::transport::{OutboundFrame, Transport, TransportEvent, TransportLink};
use futures_util::{SinkExt, StreamExt};
use std::sync::Once;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Transport that speaks text frames over `ws://` or `wss://`
///
/// TLS uses the webpki root store; certificate verification failures are
/// reported as [`DeliveryError::CertificatePinning`].
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        install_crypto_provider();
        Self { connect_timeout }
    }
}

/// Make ring the process-wide rustls provider unless one is already set
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, endpoint: &str) -> DeliveryResult<TransportLink> {
        let runtime = Handle::try_current().map_err(|_| DeliveryError::NoRuntime)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_socket(
            endpoint.to_string(),
            self.connect_timeout,
            outbound_rx,
            events_tx,
        ));

        Ok(TransportLink::new(outbound_tx, events_rx))
    }
}

/// Map a tungstenite failure onto the client's failure classes
pub fn classify_ws_error(err: tungstenite::Error) -> DeliveryError {
    match err {
        tungstenite::Error::Io(e) => classify_io_error(&e),
        tungstenite::Error::Http(ref response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                DeliveryError::Authentication(format!("handshake rejected with {}", status))
            } else {
                DeliveryError::Server(format!("handshake rejected with {}", status))
            }
        }
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            DeliveryError::Connection("connection closed".to_string())
        }
        other => DeliveryError::from_transport_message(other.to_string()),
    }
}

/// TLS handshake failures arrive as I/O errors wrapping a `rustls::Error`
fn classify_io_error(err: &std::io::Error) -> DeliveryError {
    let tls = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match tls {
        Some(rustls::Error::InvalidCertificate(reason)) => {
            DeliveryError::CertificatePinning(format!("invalid peer certificate: {:?}", reason))
        }
        Some(tls) => DeliveryError::Network(format!("TLS handshake failed: {}", tls)),
        None => match DeliveryError::from_transport_message(err.to_string()) {
            cert @ DeliveryError::CertificatePinning(_) => cert,
            _ => DeliveryError::Network(err.to_string()),
        },
    }
}

async fn run_socket(
    endpoint: String,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    debug!(endpoint = %endpoint, "Opening WebSocket");

    let stream = match tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str())).await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::Failed(classify_ws_error(e)));
            return;
        }
        Err(_) => {
            let _ = events.send(TransportEvent::Failed(DeliveryError::Network(format!(
                "connect timed out after {:?}",
                connect_timeout
            ))));
            return;
        }
    };

    info!(endpoint = %endpoint, "WebSocket connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Failed(classify_ws_error(e)));
                        break;
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    debug!(endpoint = %endpoint, "WebSocket closed locally");
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(endpoint = %endpoint, error = %e, "WebSocket error");
                    let _ = events.send(TransportEvent::Failed(classify_ws_error(e)));
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_network_failures() {
        let err = tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(classify_ws_error(err), DeliveryError::Network(_)));
    }

    #[test]
    fn test_invalid_certificate_is_not_retryable() {
        let tls = rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer);
        let err = classify_ws_error(tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            tls,
        )));

        assert!(err.is_certificate_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_tls_errors_stay_retryable() {
        let tls = rustls::Error::HandshakeNotComplete;
        let err = classify_ws_error(tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            tls,
        )));

        assert!(matches!(err, DeliveryError::Network(_)));
    }

    #[test]
    fn test_certificate_message_without_tls_source() {
        let err = classify_ws_error(tungstenite::Error::Io(std::io::Error::other(
            "invalid peer certificate: UnknownIssuer",
        )));
        assert!(err.is_certificate_failure());
    }

    #[test]
    fn test_closed_is_retryable_connection_failure() {
        let err = classify_ws_error(tungstenite::Error::ConnectionClosed);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_failure() {
        let transport = WebSocketTransport::new(Duration::from_secs(2));
        let mut link = transport.open("ws://127.0.0.1:1/events").unwrap();

        let event = link.events.recv().await.unwrap();
        match event {
            TransportEvent::Failed(err) => assert!(err.is_retryable()),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let transport = WebSocketTransport::default();
        assert_eq!(
            transport.open("ws://127.0.0.1:1").unwrap_err(),
            DeliveryError::NoRuntime
        );
    }
}
