//! Process-wide event bus.
//!
//! Events carry a dotted type, a source tag, and a JSON payload whose
//! shape is fixed per event type (see [`registry`]). Subscriptions take a
//! wildcard pattern; each subscription owns a FIFO queue drained by its
//! own task, so one slow listener never reorders or blocks another.

mod bus;
mod pattern;
pub mod payloads;
pub mod registry;

pub use bus::{EventBus, Listener, SubscriptionId};
pub use pattern::pattern_matches;
pub use registry::{PayloadRegistry, TokenOption};

use serde::Serialize;
use serde_json::Value;

/// One dispatched event. `payload` is the serialized form of the typed
/// record registered for `event_type`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Event with no payload body.
    pub fn signal(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload: Value::Null,
        }
    }
}
