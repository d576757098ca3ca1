//! Session tuning options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chat_session::SessionOptions;
//!
//! let options = SessionOptions::new()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_channel_kind("team");
//!
//! assert_eq!(options.join_timeout, Duration::from_secs(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::credential::DEFAULT_FRESHNESS;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on open plus authenticate.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a channel join.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default channel type for two-party conversations.
pub const DEFAULT_CHANNEL_KIND: &str = "messaging";

// ============================================================================
// SessionOptions
// ============================================================================

/// Timeouts and channel settings of a [`crate::SessionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long a cached credential stays usable.
    pub credential_freshness: Duration,

    /// Bound on transport open plus authenticate.
    pub connect_timeout: Duration,

    /// Bound on a channel join.
    pub join_timeout: Duration,

    /// Channel type passed to the backend on join.
    pub channel_kind: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            credential_freshness: DEFAULT_FRESHNESS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            channel_kind: DEFAULT_CHANNEL_KIND.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the credential freshness window.
    #[inline]
    #[must_use]
    pub fn with_credential_freshness(mut self, freshness: Duration) -> Self {
        self.credential_freshness = freshness;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the join timeout.
    #[inline]
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Sets the channel type.
    #[inline]
    #[must_use]
    pub fn with_channel_kind(mut self, kind: impl Into<String>) -> Self {
        self.channel_kind = kind.into();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
