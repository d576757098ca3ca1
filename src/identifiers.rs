//! Type-safe identifiers for session entities.
//!
//! Newtype wrappers prevent mixing user ids, channel ids and connection
//! handles at compile time.
//!
//! | Type | Backing | Source |
//! |------|---------|--------|
//! | [`UserId`] | `String` | Supplied by the host application |
//! | [`ChannelId`] | `String` | Derived from two [`UserId`]s |
//! | [`MessageId`] | `String` | Assigned by the messaging backend |
//! | [`ConnectionId`] | `u64` | Process-wide counter |
//! | [`SubscriptionId`] | `u64` | Process-wide counter |
//! | [`Generation`] | `u64` | Per-controller counter |
//! | [`RequestId`] | `Uuid` | Random per wire request |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Separator placed between the two participant ids of a [`ChannelId`].
pub const CHANNEL_ID_SEPARATOR: char = '-';

/// Global counter for connection handles.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Global counter for channel subscriptions.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// UserId
// ============================================================================

/// Opaque identifier of an end user on the messaging backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Canonical identifier of a two-party conversation channel.
///
/// Both participants compute the same id regardless of who initiates:
/// the two user ids are ordered lexicographically and joined with
/// [`CHANNEL_ID_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Derives the channel id for a conversation between `a` and `b`.
    ///
    /// # Example
    ///
    /// ```
    /// use chat_session::{ChannelId, UserId};
    ///
    /// let forward = ChannelId::derive(&UserId::new("u1"), &UserId::new("u2"));
    /// let reverse = ChannelId::derive(&UserId::new("u2"), &UserId::new("u1"));
    /// assert_eq!(forward, reverse);
    /// assert_eq!(forward.as_str(), "u1-u2");
    /// ```
    #[must_use]
    pub fn derive(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{low}{CHANNEL_ID_SEPARATOR}{high}"))
    }

    /// Wraps an id received from the backend verbatim.
    #[inline]
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// MessageId
// ============================================================================

/// Identifier of a message accepted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Handle of one authenticated transport connection.
///
/// Allocated from a process-wide counter, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// One watch of a channel on one session.
///
/// A session may watch the same channel more than once; each watch gets its
/// own id so it can be stopped without touching the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next subscription id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Transition generation of a session controller.
///
/// Every input change produces a fresh generation; results tagged with an
/// older generation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    /// Creates a generation from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the generation that follows this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id of a wire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a random request id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_channel_id_orders_participants() {
        let id = ChannelId::derive(&UserId::new("u2"), &UserId::new("u1"));
        assert_eq!(id.as_str(), "u1-u2");
    }

    #[test]
    fn test_channel_id_with_object_ids() {
        let a = UserId::new("67d1f0a2c3b4");
        let b = UserId::new("5f00aa00bb11");
        assert_eq!(
            ChannelId::derive(&a, &b).as_str(),
            "5f00aa00bb11-67d1f0a2c3b4"
        );
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let first = SubscriptionId::next();
        let second = SubscriptionId::next();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("sub-"));
    }

    #[test]
    fn test_generation_next() {
        let generation = Generation::default();
        assert_eq!(generation.as_u64(), 0);
        assert_eq!(generation.next().as_u64(), 1);
        assert!(generation.next() > generation);
    }

    #[test]
    fn test_user_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new("u1")).unwrap();
        assert_eq!(json, "\"u1\"");
    }

    proptest! {
        #[test]
        fn prop_channel_id_is_symmetric(a in "[a-z0-9]{1,24}", b in "[a-z0-9]{1,24}") {
            let a = UserId::new(a);
            let b = UserId::new(b);
            prop_assert_eq!(ChannelId::derive(&a, &b), ChannelId::derive(&b, &a));
        }

        #[test]
        fn prop_channel_id_contains_both_ids(a in "[a-z0-9]{1,24}", b in "[a-z0-9]{1,24}") {
            let a = UserId::new(a);
            let b = UserId::new(b);
            let id = ChannelId::derive(&a, &b);
            prop_assert_eq!(id.as_str().len(), a.as_str().len() + b.as_str().len() + 1);
            prop_assert!(id.as_str().starts_with(std::cmp::min(&a, &b).as_str()));
        }
    }
}
