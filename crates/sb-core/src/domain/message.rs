//! Message payloads, user properties and the observer envelope.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Tenant id stamped on template messages when none is given.
pub const DEFAULT_TENANT_ID: &str = "11111111-1111-1111-1111-555555550001";

/// Sender stamped on forwarding-topology messages when none is given.
pub const DEFAULT_TOPOLOGY_SENDER: &str = "GlobalOutboxSender";

/// A user-property value. Closed set of scalars plus nested JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(serde_json::Value),
}

impl PropertyValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric view used by filter comparisons.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// User properties, ordered by key.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A message handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub label: Option<String>,
    pub properties: Properties,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::new_v4().simple().to_string(),
            label: None,
            properties: Properties::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// A message pulled from a queue or subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub sequence_number: u64,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: u32,
    pub label: Option<String>,
    pub properties: Properties,
    pub body: Vec<u8>,
    /// Present for locked deliveries; `None` for browsed messages.
    pub lock_token: Option<Uuid>,
}

/// What a listener hands to its observer for every message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    pub received_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub message_id: String,
    pub entity_name: String,
    pub subscription_name: Option<String>,
    pub label: Option<String>,
    pub user_properties: Properties,
    pub body: Vec<u8>,
}

impl MessageEnvelope {
    /// Body as text, lossy for non-UTF-8 payloads.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of a send: the id and the exact serialized body transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub body: String,
}

/// Sample `TimeService.TimePassed` body.
#[must_use]
pub fn time_passed_body(now: DateTime<FixedOffset>) -> serde_json::Value {
    // Eight fractional digits; chrono only formats 3, 6 or 9.
    let fraction = (now.nanosecond() % 1_000_000_000) / 10;
    let timestamp = format!(
        "{}.{fraction:08}{}",
        now.format("%Y-%m-%dT%H:%M:%S"),
        now.format("%:z")
    );
    serde_json::json!({
        "Timestamp": timestamp,
        "TheTime": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
    })
}

/// Properties for the forwarding-topology message convention.
#[must_use]
pub fn forwarding_topology_properties(
    sender: &str,
    name: &str,
    domain: &str,
    tenant_id: &str,
    version: &str,
) -> Properties {
    let sender = or_default(sender, DEFAULT_TOPOLOGY_SENDER);
    let tenant_id = or_default(tenant_id, DEFAULT_TENANT_ID);
    let version = or_default(version, "1.0");

    Properties::from([
        ("X-MsgTypeVersion".to_string(), version.into()),
        ("X-MsgDomain".to_string(), domain.into()),
        ("X-MsgName".to_string(), name.into()),
        ("X-Sender".to_string(), sender.into()),
        ("X-TenantId".to_string(), tenant_id.into()),
        (
            "Diagnostic-Id".to_string(),
            Uuid::new_v4().simple().to_string().into(),
        ),
    ])
}

/// Properties for the "uno" message convention.
#[must_use]
pub fn uno_properties(tenant_id: &str) -> Properties {
    Properties::from([
        ("Serialization".to_string(), "1".into()),
        (
            "TenantId".to_string(),
            or_default(tenant_id, DEFAULT_TENANT_ID).into(),
        ),
    ])
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}
