//! Protocol message wrapper used by transports.
//!
//! Wraps requests, responses, and events with correlation metadata so a
//! thin transport (JSON lines over stdio or TCP) can route them without
//! understanding the payloads.

use crate::events::DebugEvent;
use crate::requests::{DebugRequest, DebugResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Type of protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A request from the front-end.
    Request,
    /// A response to a request.
    Response,
    /// An event pushed by the core.
    Event,
    /// A failed request.
    Error,
}

/// Envelope carried on the wire by the JSON-lines transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Unique message identifier.
    pub msg_id: String,
    /// Message kind.
    pub msg_type: MessageType,
    /// Creation timestamp.
    pub date: DateTime<Utc>,
    /// Payload: a [`DebugRequest`], [`DebugResponse`], [`DebugEvent`],
    /// or an error object.
    pub content: serde_json::Value,
}

impl ProtocolMessage {
    /// Wrap a request.
    #[must_use]
    pub fn request(request: &DebugRequest) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: MessageType::Request,
            date: Utc::now(),
            content: serde_json::to_value(request).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Wrap a response correlated to `msg_id`.
    #[must_use]
    pub fn response(msg_id: impl Into<String>, response: &DebugResponse) -> Self {
        Self {
            msg_id: msg_id.into(),
            msg_type: MessageType::Response,
            date: Utc::now(),
            content: serde_json::to_value(response).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Wrap an event.
    #[must_use]
    pub fn event(event: &DebugEvent) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: MessageType::Event,
            date: Utc::now(),
            content: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Wrap an error correlated to `msg_id`.
    #[must_use]
    pub fn error(msg_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            msg_id: msg_id.into(),
            msg_type: MessageType::Error,
            date: Utc::now(),
            content: serde_json::json!({ "error": error.to_string() }),
        }
    }

    /// Try to extract a request from the message.
    #[must_use]
    pub fn as_request(&self) -> Option<DebugRequest> {
        if self.msg_type == MessageType::Request {
            serde_json::from_value(self.content.clone()).ok()
        } else {
            None
        }
    }

    /// Try to extract a response from the message.
    #[must_use]
    pub fn as_response(&self) -> Option<DebugResponse> {
        if self.msg_type == MessageType::Response {
            serde_json::from_value(self.content.clone()).ok()
        } else {
            None
        }
    }

    /// Try to extract an event from the message.
    #[must_use]
    pub fn as_event(&self) -> Option<DebugEvent> {
        if self.msg_type == MessageType::Event {
            serde_json::from_value(self.content.clone()).ok()
        } else {
            None
        }
    }
}
