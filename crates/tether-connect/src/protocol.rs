//! Wire protocol: outbound JSON envelopes and inbound control signals

use crate::error::DeliveryResult;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tether_core_queue::QueuedEvent;

/// Outbound message, tagged by its `type` field
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Envelope<'a> {
    #[serde(rename = "AUTH")]
    Auth {
        timestamp: String,
        payload: AuthPayload<'a>,
    },

    /// A single raw event, carried verbatim as a string
    #[serde(rename = "EVENT")]
    Event { timestamp: String, payload: &'a str },

    #[serde(rename = "batch")]
    Batch {
        timestamp: String,
        #[serde(rename = "instanceId")]
        instance_id: &'a str,
        events: Vec<&'a str>,
    },

    #[serde(rename = "PING")]
    Ping { timestamp: String },
}

/// Credentials presented right after the transport opens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload<'a> {
    pub token: &'a str,
    pub instance_id: &'a str,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl<'a> Envelope<'a> {
    pub fn auth(token: &'a str, instance_id: &'a str) -> Self {
        Envelope::Auth {
            timestamp: now(),
            payload: AuthPayload { token, instance_id },
        }
    }

    pub fn event(payload: &'a str) -> Self {
        Envelope::Event {
            timestamp: now(),
            payload,
        }
    }

    pub fn batch(instance_id: &'a str, events: &'a [QueuedEvent]) -> Self {
        Envelope::Batch {
            timestamp: now(),
            instance_id,
            events: events.iter().map(QueuedEvent::payload).collect(),
        }
    }

    pub fn ping() -> Self {
        Envelope::Ping { timestamp: now() }
    }

    /// Serialize to the text frame sent over the transport
    pub fn to_json(&self) -> DeliveryResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Control signal recognized in an inbound text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundSignal {
    AuthSuccess,
    AuthFailed,
    Error,
    Pong,
    Ack,
    Unknown,
}

impl InboundSignal {
    /// Classify an inbound frame by substring
    ///
    /// Checked in a fixed order so that `NOT_AUTHENTICATED` is read as an
    /// authentication failure and never as anything else.
    pub fn classify(text: &str) -> Self {
        if text.contains("AUTH_SUCCESS") {
            InboundSignal::AuthSuccess
        } else if text.contains("AUTH_FAILED") || text.contains("NOT_AUTHENTICATED") {
            InboundSignal::AuthFailed
        } else if text.contains("ERROR") {
            InboundSignal::Error
        } else if text.contains("PONG") {
            InboundSignal::Pong
        } else if text.contains("ACK") {
            InboundSignal::Ack
        } else {
            InboundSignal::Unknown
        }
    }
}
