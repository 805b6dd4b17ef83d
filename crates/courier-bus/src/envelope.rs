//! # Envelope
//!
//! The wire-level unit exchanged over a topic:
//!
//! ```json
//! { "id": "6f1c…", "event": "order.created", "args": [42, {"sku": "A1"}] }
//! ```
//!
//! Every envelope built by this crate carries an `id`, so a receiver that
//! treats the event as race-mode always has something to lock on, even when
//! the race registration happened after the envelope was sent.

use crate::error::BusError;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// An application event in transit.
///
/// Only serialized through serde. Inbound payloads go through
/// [`Envelope::decode`], which tolerates a missing or malformed `id` and
/// `args` from foreign peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Unique per emit. Optional on the wire for compatibility with peers
    /// that only attach it to race-mode events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event name, never empty.
    pub event: String,

    /// Listener arguments in call order.
    pub args: Vec<Value>,
}

impl Envelope {
    /// Build an envelope with a freshly generated id.
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            event: event.into(),
            args,
        }
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn encode(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|e| BusError::Encode(e.to_string()))
    }

    /// Parse and validate an inbound payload.
    ///
    /// # Errors
    ///
    /// - `BusError::Parse` - not JSON (or not UTF-8)
    /// - `BusError::CorruptMessage` - JSON, but not an object with a
    ///   non-empty string `event`
    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| BusError::Parse(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(BusError::CorruptMessage("envelope is not an object".to_string()));
        };

        let event = match fields.remove("event") {
            Some(Value::String(event)) if !event.is_empty() => event,
            _ => {
                return Err(BusError::CorruptMessage(
                    "missing or empty event name".to_string(),
                ))
            }
        };

        let id = match fields.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        };

        let args = match fields.remove("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(single) => vec![single],
        };

        Ok(Self { id, event, args })
    }
}
