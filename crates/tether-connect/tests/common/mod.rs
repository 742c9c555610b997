//! In-memory transport for driving the client without sockets

#![allow(dead_code)]

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tether_connect::{
    ClientSettings, DeliveryError, DeliveryResult, OutboundFrame, Transport, TransportEvent,
    TransportLink,
};
use tether_core_queue::BatcherConfig;
use tether_core_resilience::{BackoffConfig, CircuitBreakerConfig};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

/// The server's end of one mock connection
pub struct Remote {
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Remote {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).expect("client stopped listening");
    }

    pub fn reply(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    pub async fn next_frame(&mut self) -> OutboundFrame {
        timeout(WAIT, self.outbound.recv())
            .await
            .expect("no frame in time")
            .expect("client dropped the connection")
    }

    pub async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            OutboundFrame::Text(text) => serde_json::from_str(&text).expect("frame is JSON"),
            OutboundFrame::Close => panic!("expected a text frame, got close"),
        }
    }

    /// Open the connection and answer the AUTH handshake
    pub async fn accept(&mut self) -> Value {
        self.emit(TransportEvent::Opened);
        let auth = self.next_json().await;
        assert_eq!(auth["type"], "AUTH");
        self.reply(r#"{"type":"AUTH_SUCCESS"}"#);
        auth
    }
}

#[derive(Default)]
pub struct MockTransport {
    remotes: Mutex<VecDeque<Remote>>,
    opened: Notify,
    opens: AtomicUsize,
    refuse: Mutex<Option<DeliveryError>>,
}

impl MockTransport {
    /// Make every subsequent `open` fail with `err`
    pub fn refuse_with(&self, err: DeliveryError) {
        *self.refuse.lock().unwrap() = Some(err);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub async fn next_remote(&self) -> Remote {
        timeout(WAIT, async {
            loop {
                if let Some(remote) = self.remotes.lock().unwrap().pop_front() {
                    return remote;
                }
                self.opened.notified().await;
            }
        })
        .await
        .expect("client did not open a connection in time")
    }
}

impl Transport for MockTransport {
    fn open(&self, _endpoint: &str) -> DeliveryResult<TransportLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.refuse.lock().unwrap().clone() {
            return Err(err);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.remotes.lock().unwrap().push_back(Remote {
            outbound: outbound_rx,
            events: events_tx,
        });
        self.opened.notify_one();

        Ok(TransportLink::new(outbound_tx, events_rx))
    }
}

/// Settings with short delays and batching off
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        endpoint: "wss://ingest.test/events".to_string(),
        auth_token: "test-token".to_string(),
        instance_id: "instance-1".to_string(),
        batching_enabled: false,
        batcher: BatcherConfig {
            max_batch_size: 2,
            flush_timeout: Duration::from_millis(50),
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_millis(100),
            half_open_max_attempts: 3,
        },
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(20),
            multiplier: 1.5,
            max_delay: Duration::from_millis(200),
        },
        heartbeat_interval: Duration::ZERO,
        ..ClientSettings::default()
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
