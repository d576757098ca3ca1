//! Event message types.
//!
//! Events are pushed by the backend for channels the client watches.
//!
//! | Method | Meaning |
//! |--------|---------|
//! | `message.new` | A message was posted to the channel |
//! | `member.added` | A member joined the channel |
//! | `member.removed` | A member left the channel |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::identifiers::{ChannelId, UserId};
use crate::transport::{ChannelEvent, ChatMessage};

// ============================================================================
// Event
// ============================================================================

/// An event notification from backend to client.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "message.new",
///   "params": { "channelId": "u1-u2", ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type marker (always "event").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,
}

impl Event {
    /// Creates a `message.new` event.
    #[must_use]
    pub fn message_new(channel_id: &ChannelId, message: &ChatMessage) -> Self {
        Self {
            event_type: "event".to_string(),
            method: "message.new".to_string(),
            params: json!({ "channelId": channel_id, "message": message }),
        }
    }

    /// Returns the channel the event belongs to.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.params
            .get("channelId")
            .and_then(Value::as_str)
            .map(ChannelId::from_raw)
    }

    /// Converts the event into a typed [`ChannelEvent`].
    ///
    /// Unknown methods and malformed params become [`ChannelEvent::Other`].
    #[must_use]
    pub fn parse(&self) -> ChannelEvent {
        match self.method.as_str() {
            "message.new" => self
                .params
                .get("message")
                .cloned()
                .and_then(|message| serde_json::from_value::<ChatMessage>(message).ok())
                .map_or_else(|| self.other(), ChannelEvent::MessageNew),
            "member.added" => self
                .user_param()
                .map_or_else(|| self.other(), ChannelEvent::MemberAdded),
            "member.removed" => self
                .user_param()
                .map_or_else(|| self.other(), ChannelEvent::MemberRemoved),
            _ => self.other(),
        }
    }

    fn user_param(&self) -> Option<UserId> {
        self.params
            .get("userId")
            .and_then(Value::as_str)
            .map(UserId::new)
    }

    fn other(&self) -> ChannelEvent {
        ChannelEvent::Other {
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
