//! Transport contract.
//!
//! The messaging backend is reached through two traits:
//!
//! - [`Transport`] opens raw sessions (one socket each)
//! - [`TransportSession`] authenticates, watches channels, sends messages
//!   and disconnects
//!
//! Adapters convert backend failures into typed [`crate::Error`] variants
//! before returning them.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::credential::AccessToken;
use crate::error::Result;
use crate::identifiers::{ChannelId, MessageId, SubscriptionId, UserId};
use crate::identity::Identity;

// ============================================================================
// Channel Data
// ============================================================================

/// A message posted to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend-assigned id.
    pub id: MessageId,
    /// Author.
    pub user: UserId,
    /// Message text.
    pub text: String,
}

/// State of a channel at the moment it was watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Current members.
    #[serde(default)]
    pub members: Vec<UserId>,
    /// Recent messages, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Live event on a watched channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A message was posted.
    MessageNew(ChatMessage),
    /// A member joined.
    MemberAdded(UserId),
    /// A member left.
    MemberRemoved(UserId),
    /// Any event the crate does not model.
    Other {
        /// Event method.
        method: String,
        /// Raw params.
        params: Value,
    },
}

// ============================================================================
// Watch
// ============================================================================

/// What to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    /// Channel type (e.g. `"messaging"`).
    pub kind: String,
    /// Channel id.
    pub channel_id: ChannelId,
    /// Exact member set.
    pub members: Vec<UserId>,
}

/// Result of a watch: the snapshot plus every event after it.
///
/// Adapters register the subscription before the snapshot is taken, so no
/// event falls between the two.
#[derive(Debug)]
pub struct Watch {
    /// Handle passed back to [`TransportSession::unwatch`].
    pub subscription: SubscriptionId,
    /// Channel state at join time.
    pub snapshot: ChannelSnapshot,
    /// Events after the snapshot.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

// ============================================================================
// Transport
// ============================================================================

/// Factory of transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens an unauthenticated session.
    ///
    /// # Errors
    ///
    /// Connection-category errors when the backend is unreachable.
    async fn open(&self) -> Result<Box<dyn TransportSession>>;
}

/// One open socket to the backend.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Authenticates the session as `user`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::AuthRejected`] if the token is refused.
    async fn authenticate(&self, user: &Identity, token: &AccessToken) -> Result<()>;

    /// Joins a channel with exactly `request.members` and subscribes to it.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ChannelRejected`] if the backend refuses the join.
    async fn watch(&self, request: WatchRequest) -> Result<Watch>;

    /// Stops one subscription on `channel_id`.
    ///
    /// Other subscriptions to the same channel on this session keep
    /// receiving events. Unknown subscriptions are ignored.
    async fn unwatch(&self, channel_id: &ChannelId, subscription: SubscriptionId) -> Result<()>;

    /// Posts `text` to `channel_id`.
    async fn send_message(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId>;

    /// Closes the session. Calling it twice is harmless.
    async fn disconnect(&self) -> Result<()>;
}
