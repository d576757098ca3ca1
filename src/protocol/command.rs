//! Commands sent to the messaging backend.
//!
//! Commands follow `module.methodName` format.
//!
//! | Module | Commands |
//! |--------|----------|
//! | `connection` | `authenticate`, `disconnect` |
//! | `channel` | `watch`, `unwatch` |
//! | `message` | `send` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::{ChannelId, UserId};
use crate::identity::Identity;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Connection module commands.
    Connection(ConnectionCommand),
    /// Channel module commands.
    Channel(ChannelCommand),
    /// Message module commands.
    Message(MessageCommand),
}

impl Command {
    /// Returns the `module.methodName` of the command.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Connection(ConnectionCommand::Authenticate { .. }) => "connection.authenticate",
            Self::Connection(ConnectionCommand::Disconnect) => "connection.disconnect",
            Self::Channel(ChannelCommand::Watch { .. }) => "channel.watch",
            Self::Channel(ChannelCommand::Unwatch { .. }) => "channel.unwatch",
            Self::Message(MessageCommand::Send { .. }) => "message.send",
        }
    }
}

// ============================================================================
// Connection Commands
// ============================================================================

/// Connection module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ConnectionCommand {
    /// Authenticate the socket as `user`.
    #[serde(rename = "connection.authenticate")]
    Authenticate {
        /// User descriptor (id, name, image).
        user: Identity,
        /// Access token.
        token: String,
    },

    /// Close the session server-side.
    #[serde(rename = "connection.disconnect")]
    Disconnect,
}

// ============================================================================
// Channel Commands
// ============================================================================

/// Channel module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ChannelCommand {
    /// Create-or-join a channel and subscribe to its events.
    ///
    /// The response carries the channel snapshot.
    #[serde(rename = "channel.watch")]
    Watch {
        /// Channel type.
        #[serde(rename = "type")]
        kind: String,
        /// Channel id.
        id: ChannelId,
        /// Exact member set.
        members: Vec<UserId>,
    },

    /// Stop receiving events for a channel.
    #[serde(rename = "channel.unwatch")]
    Unwatch {
        /// Channel type.
        #[serde(rename = "type")]
        kind: String,
        /// Channel id.
        id: ChannelId,
    },
}

// ============================================================================
// Message Commands
// ============================================================================

/// Message module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum MessageCommand {
    /// Post a message to a channel.
    #[serde(rename = "message.send")]
    Send {
        /// Target channel.
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        /// Message text.
        text: String,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_serialization() {
        let command = Command::Channel(ChannelCommand::Watch {
            kind: "messaging".into(),
            id: ChannelId::from_raw("u1-u2"),
            members: vec![UserId::new("u1"), UserId::new("u2")],
        });

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["method"], "channel.watch");
        assert_eq!(json["params"]["type"], "messaging");
        assert_eq!(json["params"]["id"], "u1-u2");
        assert_eq!(json["params"]["members"][1], "u2");
        assert_eq!(command.method(), "channel.watch");
    }

    #[test]
    fn test_unit_command_serialization() {
        let command = Command::Connection(ConnectionCommand::Disconnect);
        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("connection.disconnect"));
    }

    #[test]
    fn test_send_serialization() {
        let command = Command::Message(MessageCommand::Send {
            channel_id: ChannelId::from_raw("u1-u2"),
            text: "hello".into(),
        });

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["method"], "message.send");
        assert_eq!(json["params"]["channelId"], "u1-u2");
    }
}
