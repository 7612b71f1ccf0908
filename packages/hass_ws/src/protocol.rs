//! Wire shapes for the realtime API.
//!
//! Every frame is a single JSON object. Outbound commands are tagged by
//! `type`; inbound frames are only decoded as far as routing needs
//! (see [`Envelope`]), the rest stays as raw bytes for the consumer.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HassError, Result};
use crate::id::next_id;

pub const TYPE_RESULT: &str = "result";
pub const TYPE_EVENT: &str = "event";
pub const TYPE_AUTH_OK: &str = "auth_ok";

/// Commands sent to the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: i64,
        event_type: String,
    },
    FireEvent {
        id: i64,
        event_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_data: Option<Map<String, Value>>,
    },
    CallService(ServiceCall),
}

impl OutboundMessage {
    /// The correlation id, if this command carries one.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Auth { .. } => None,
            Self::SubscribeEvents { id, .. } | Self::FireEvent { id, .. } => Some(*id),
            Self::CallService(call) => Some(call.id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SubscribeEvents { .. } => "subscribe_events",
            Self::FireEvent { .. } => "fire_event",
            Self::CallService(_) => "call_service",
        }
    }
}

/// Entities a service call applies to. Empty fields are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
}

impl ServiceTarget {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none()
            && self.area_id.is_none()
            && self.device_id.is_none()
            && self.label_id.is_none()
    }
}

/// A `call_service` command. The id is allocated when the call is built.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCall {
    pub id: i64,
    pub domain: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,
    #[serde(skip_serializing_if = "ServiceTarget::is_empty")]
    pub target: ServiceTarget,
    pub return_response: bool,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            domain: domain.into(),
            service: service.into(),
            service_data: None,
            target: ServiceTarget::default(),
            return_response: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.service_data = Some(data);
        self
    }

    pub fn with_target(mut self, target: ServiceTarget) -> Self {
        self.target = target;
        self
    }

    /// Ask the hub to return the service's response, and wait for it.
    pub fn with_response(mut self, return_response: bool) -> Self {
        self.return_response = return_response;
        self
    }
}

fn default_success() -> bool {
    true
}

#[derive(Deserialize)]
struct EnvelopeFields {
    #[serde(rename = "type", default)]
    msg_type: String,
    #[serde(default)]
    id: Option<i64>,
    // An absent `success` means there was nothing to report, not a failure.
    #[serde(default = "default_success")]
    success: bool,
}

/// The routing fields of an inbound frame plus its undecoded bytes.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Option<i64>,
    pub msg_type: String,
    pub success: bool,
    pub raw: Arc<[u8]>,
}

impl Envelope {
    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        let fields: EnvelopeFields = serde_json::from_slice(raw)?;
        Ok(Self {
            id: fields.id,
            msg_type: fields.msg_type,
            success: fields.success,
            raw: Arc::from(raw),
        })
    }

    pub fn is_result_for(&self, id: i64) -> bool {
        self.msg_type == TYPE_RESULT && self.id == Some(id)
    }

    /// `event.event_type` of an `event` frame, `None` for anything else.
    pub fn event_type(&self) -> Option<String> {
        if self.msg_type != TYPE_EVENT {
            return None;
        }
        serde_json::from_slice::<EventFrame<EventHeader>>(&self.raw)
            .ok()
            .map(|frame| frame.event.event_type)
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.raw)
    }
}

#[derive(Deserialize)]
struct EventFrame<T> {
    event: T,
}

#[derive(Deserialize)]
struct EventHeader {
    event_type: String,
}

/// An event delivered to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub event_type: String,
    pub raw: Vec<u8>,
}

impl EventData {
    /// Decode the frame's `event` object into `T`.
    pub fn event<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice::<EventFrame<T>>(&self.raw).map(|frame| frame.event)
    }
}

/// The `response` carried by a `result` frame. `Value::Null` when the call
/// did not ask for one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceResponse {
    pub response: Value,
}

#[derive(Deserialize, Default)]
struct ResultFrame {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

impl ServiceResponse {
    /// Unexpected result shapes are tolerated: a successful frame without a
    /// readable `result.response` yields `Value::Null`.
    pub(crate) fn from_envelope(id: i64, envelope: &Envelope) -> Result<Self> {
        let frame: ResultFrame = serde_json::from_slice(&envelope.raw).unwrap_or_default();
        if !envelope.success {
            let field = |key: &str| frame.error.get(key).and_then(Value::as_str).map(str::to_string);
            return Err(HassError::CallFailed {
                id,
                code: field("code").unwrap_or_else(|| "unknown_error".to_string()),
                message: field("message").unwrap_or_default(),
            });
        }
        Ok(Self {
            response: frame.result.get("response").cloned().unwrap_or_default(),
        })
    }
}
