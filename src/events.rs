//! Event records handed to the external delivery collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::binary::Node;

pub const SESSION_QR_READY: &str = "session.qr_ready";
pub const SESSION_CONNECTED: &str = "session.connected";
pub const SESSION_DISCONNECTED: &str = "session.disconnected";
pub const SESSION_PERSIST_FAILED: &str = "session.persist_failed";
pub const MESSAGE_RECEIVED: &str = "message.received";
pub const MESSAGE_DELIVERED: &str = "message.delivered";
pub const MESSAGE_READ: &str = "message.read";

/// One tagged record for the delivery subsystem. Serialises with an
/// ISO-8601 UTC timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn new(event: &'static str, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Maps an inbound application node to the event it represents, if its
/// shape matches one: `message` nodes and `receipt` nodes of delivery/read
/// type. Everything else is protocol chatter with no external audience.
pub fn event_for_node(session_id: &str, node: &Node) -> Option<EventRecord> {
    match node.tag.as_str() {
        "message" => {
            let body = node
                .get_optional_child("body")
                .and_then(|b| b.content_string())
                .unwrap_or_default();
            Some(EventRecord::new(
                MESSAGE_RECEIVED,
                json!({
                    "sessionId": session_id,
                    "from": node.get_attr("from").unwrap_or_default(),
                    "id": node.get_attr("id").unwrap_or_default(),
                    "text": body,
                }),
            ))
        }
        "receipt" => {
            let event = match node.get_attr("type") {
                None | Some("delivery") => MESSAGE_DELIVERED,
                Some("read") => MESSAGE_READ,
                Some(_) => return None,
            };
            Some(EventRecord::new(
                event,
                json!({
                    "sessionId": session_id,
                    "from": node.get_attr("from").unwrap_or_default(),
                    "id": node.get_attr("id").unwrap_or_default(),
                }),
            ))
        }
        _ => None,
    }
}
