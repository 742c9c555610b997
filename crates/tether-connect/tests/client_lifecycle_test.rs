//! Integration tests for the connection client
//!
//! A mock transport stands in for the socket so each test can play the
//! server: open the connection, answer AUTH, drop it, or fail it.

mod common;

use common::{fast_settings, wait_until, MockTransport};
use std::sync::Arc;
use std::time::Duration;
use tether_connect::{
    ClientSettings, ConnectionClient, ConnectionState, DeliveryError, OutboundFrame, SendOutcome,
    TransportEvent,
};
use tether_core_resilience::{CircuitBreakerConfig, CircuitState};

fn build(settings: ClientSettings, transport: &Arc<MockTransport>) -> ConnectionClient {
    ConnectionClient::builder(Arc::new(settings), transport.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_authenticates_and_flushes_queue_in_order() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);

    for event in ["e1", "e2", "e3"] {
        assert_eq!(client.send_event(event), SendOutcome::Queued);
    }

    client.initialize().unwrap();
    let mut remote = transport.next_remote().await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    remote.emit(TransportEvent::Opened);
    let auth = remote.next_json().await;
    assert_eq!(auth["type"], "AUTH");
    assert_eq!(auth["payload"]["token"], "test-token");
    assert_eq!(auth["payload"]["instanceId"], "instance-1");
    assert_eq!(client.state(), ConnectionState::Authenticating);

    remote.reply("AUTH_SUCCESS");
    for expected in ["e1", "e2", "e3"] {
        let frame = remote.next_json().await;
        assert_eq!(frame["type"], "EVENT");
        assert_eq!(frame["payload"], expected);
    }

    wait_until(|| client.is_connected()).await;
    let metrics = client.metrics();
    assert_eq!(metrics.breaker.state, CircuitState::Closed);
    assert_eq!(metrics.breaker.consecutive_failures, 0);
    assert_eq!(metrics.reconnect.successes, 1);
    assert_eq!(metrics.events_transmitted, 3);
    assert_eq!(metrics.queue.size, 0);

    assert_eq!(client.send_event("live"), SendOutcome::Transmitted);
    assert_eq!(remote.next_json().await["payload"], "live");

    client.close();
    assert_eq!(remote.next_frame().await, OutboundFrame::Close);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_auth_failure_schedules_reconnect() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    client.initialize().unwrap();

    let mut first = transport.next_remote().await;
    first.emit(TransportEvent::Opened);
    first.next_json().await;
    first.reply(r#"{"type":"NOT_AUTHENTICATED"}"#);

    let mut second = transport.next_remote().await;
    let metrics = client.reconnect_metrics();
    assert_eq!(metrics.attempts, 2);
    assert_eq!(metrics.failures, 1);
    assert_eq!(client.metrics().breaker.consecutive_failures, 1);

    second.accept().await;
    wait_until(|| client.is_connected()).await;
    assert_eq!(client.metrics().breaker.consecutive_failures, 0);
    assert_eq!(
        client.reconnect_metrics().current_delay,
        Duration::from_millis(20)
    );

    client.close();
}

#[tokio::test]
async fn test_close_cancels_scheduled_reconnect() {
    let transport = Arc::new(MockTransport::default());
    transport.refuse_with(DeliveryError::Network("unreachable".to_string()));
    let client = build(fast_settings(), &transport);

    assert!(client.initialize().is_err());
    assert!(client.reconnect_metrics().scheduled);

    client.close();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_certificate_failure_latches_until_manual_reconnect() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    client.initialize().unwrap();

    let first = transport.next_remote().await;
    first.emit(TransportEvent::Failed(DeliveryError::CertificatePinning(
        "pin mismatch".to_string(),
    )));

    wait_until(|| client.metrics().breaker.latched).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.metrics().breaker.state, CircuitState::Open);
    assert!(!client.reconnect_metrics().scheduled);

    client.reconnect().unwrap();
    let mut second = transport.next_remote().await;
    assert!(!client.metrics().breaker.latched);

    second.accept().await;
    wait_until(|| client.is_connected()).await;
    client.close();
}

#[tokio::test]
async fn test_connection_lost_during_flush_requeues_remainder() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    for event in ["q1", "q2", "q3"] {
        client.send_event(event);
    }
    client.initialize().unwrap();

    let mut first = transport.next_remote().await;
    first.emit(TransportEvent::Opened);
    first.next_json().await;

    // The socket's writer is gone, so every send after AUTH fails
    let common::Remote { outbound, events } = first;
    drop(outbound);
    events
        .send(TransportEvent::Message("AUTH_SUCCESS".to_string()))
        .unwrap();

    wait_until(|| client.queue_metrics().total_requeued == 3).await;
    assert_eq!(client.queue_metrics().size, 3);

    events
        .send(TransportEvent::Closed {
            code: Some(1006),
            reason: "abnormal".to_string(),
        })
        .unwrap();

    let mut second = transport.next_remote().await;
    second.accept().await;
    for expected in ["q1", "q2", "q3"] {
        assert_eq!(second.next_json().await["payload"], expected);
    }

    client.close();
}

#[tokio::test]
async fn test_batches_while_connected() {
    let transport = Arc::new(MockTransport::default());
    let client = build(
        ClientSettings {
            batching_enabled: true,
            ..fast_settings()
        },
        &transport,
    );
    client.initialize().unwrap();

    let mut remote = transport.next_remote().await;
    remote.accept().await;
    wait_until(|| client.is_connected()).await;

    assert_eq!(client.send_event("a"), SendOutcome::Batched);
    assert_eq!(client.send_event("b"), SendOutcome::Batched);

    let batch = remote.next_json().await;
    assert_eq!(batch["type"], "batch");
    assert_eq!(batch["instanceId"], "instance-1");
    assert_eq!(batch["events"], serde_json::json!(["a", "b"]));

    // Below the size threshold the timer releases it
    client.send_event("c");
    let batch = remote.next_json().await;
    assert_eq!(batch["events"], serde_json::json!(["c"]));
    assert_eq!(client.metrics().batches_transmitted, 2);

    client.close();
}

#[tokio::test]
async fn test_close_flushes_pending_batch() {
    let transport = Arc::new(MockTransport::default());
    let client = build(
        ClientSettings {
            batching_enabled: true,
            batcher: tether_core_queue::BatcherConfig {
                max_batch_size: 10,
                flush_timeout: Duration::from_secs(60),
            },
            ..fast_settings()
        },
        &transport,
    );
    client.initialize().unwrap();

    let mut remote = transport.next_remote().await;
    remote.accept().await;
    wait_until(|| client.is_connected()).await;

    client.send_event("last-words");
    client.close();

    let batch = remote.next_json().await;
    assert_eq!(batch["events"], serde_json::json!(["last-words"]));
    assert_eq!(remote.next_frame().await, OutboundFrame::Close);
}

#[tokio::test]
async fn test_breaker_defers_reconnect_while_open() {
    let transport = Arc::new(MockTransport::default());
    transport.refuse_with(DeliveryError::Connection("refused".to_string()));
    let client = build(
        ClientSettings {
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_millis(400),
                half_open_max_attempts: 1,
            },
            ..fast_settings()
        },
        &transport,
    );

    assert!(client.initialize().is_err());
    wait_until(|| transport.opens() == 2).await;
    assert_eq!(client.metrics().breaker.state, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.opens(), 2, "no attempt while the breaker is open");

    wait_until(|| transport.opens() == 3).await;
    client.close();
}

#[tokio::test]
async fn test_heartbeat_and_pong() {
    let transport = Arc::new(MockTransport::default());
    let client = build(
        ClientSettings {
            heartbeat_interval: Duration::from_millis(30),
            ..fast_settings()
        },
        &transport,
    );
    client.initialize().unwrap();

    let mut remote = transport.next_remote().await;
    remote.accept().await;

    assert_eq!(remote.next_json().await["type"], "PING");
    remote.reply("PONG");

    wait_until(|| client.metrics().last_pong.is_some()).await;
    client.close();
}

#[tokio::test]
async fn test_server_error_keeps_connection() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    client.initialize().unwrap();

    let mut remote = transport.next_remote().await;
    remote.accept().await;
    wait_until(|| client.is_connected()).await;

    remote.reply(r#"{"type":"ERROR","message":"quota exceeded"}"#);
    remote.reply("ACK");
    wait_until(|| client.metrics().acks_received == 1).await;

    assert_eq!(client.metrics().server_errors, 1);
    assert!(client.is_connected());
    client.close();
}

#[tokio::test]
async fn test_superseded_connection_is_ignored() {
    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    client.initialize().unwrap();

    let mut first = transport.next_remote().await;
    first.accept().await;
    wait_until(|| client.is_connected()).await;

    client.reconnect().unwrap();
    assert_eq!(first.next_frame().await, OutboundFrame::Close);

    let mut second = transport.next_remote().await;
    second.accept().await;
    wait_until(|| client.is_connected()).await;

    let _ = first
        .events
        .send(TransportEvent::Failed(DeliveryError::Network("late".to_string())));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(client.is_connected());
    assert_eq!(client.reconnect_metrics().failures, 0);
    client.close();
}

#[tokio::test]
async fn test_manual_connect_refused_while_breaker_open() {
    let transport = Arc::new(MockTransport::default());
    transport.refuse_with(DeliveryError::Connection("refused".to_string()));
    let client = build(
        ClientSettings {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                half_open_max_attempts: 1,
            },
            ..fast_settings()
        },
        &transport,
    );

    assert!(client.initialize().is_err());
    assert_eq!(client.metrics().breaker.state, CircuitState::Open);
    assert_eq!(transport.opens(), 1);

    assert_eq!(client.connect(), Err(DeliveryError::CircuitOpen));
    assert_eq!(transport.opens(), 1);
    assert!(client.reconnect_metrics().scheduled);

    // The deferred attempt waits out the open interval
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.opens(), 1);
    assert!(client.reconnect_metrics().scheduled);

    client.close();
    assert!(!client.reconnect_metrics().scheduled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_sent_during_authentication_are_not_stranded() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 200;

    let transport = Arc::new(MockTransport::default());
    let client = build(fast_settings(), &transport);
    client.initialize().unwrap();
    let mut remote = transport.next_remote().await;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let client = client.clone();
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    client.send_event(format!("p{}-{}", p, i));
                }
            })
        })
        .collect();

    remote.accept().await;
    for producer in producers {
        producer.join().unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    while seen.len() < PRODUCERS * PER_PRODUCER {
        let frame = remote.next_json().await;
        assert_eq!(frame["type"], "EVENT");
        seen.insert(frame["payload"].as_str().unwrap().to_string());
    }

    wait_until(|| client.is_connected()).await;
    assert_eq!(client.queue_metrics().size, 0);
    client.close();
}

// NOTE: requires a reachable ingestion endpoint; set TETHER_TEST_ENDPOINT and
// TETHER_TEST_TOKEN and remove the #[ignore] attribute to run it
#[tokio::test]
#[ignore]
async fn test_live_websocket_delivery() {
    let endpoint = std::env::var("TETHER_TEST_ENDPOINT").expect("TETHER_TEST_ENDPOINT");
    let token = std::env::var("TETHER_TEST_TOKEN").expect("TETHER_TEST_TOKEN");

    let client = ConnectionClient::builder(
        Arc::new(ClientSettings {
            endpoint,
            auth_token: token,
            instance_id: "integration-test".to_string(),
            ..ClientSettings::default()
        }),
        Arc::new(tether_connect::WebSocketTransport::default()),
    )
    .build()
    .unwrap();

    client.initialize().unwrap();
    for _ in 0..200 {
        if client.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(client.is_connected(), "did not authenticate");

    client.send_event(r#"{"kind":"integration-test"}"#);
    client.close();
}
