//! Error types for the chat session lifecycle.
//!
//! This module defines all error types used throughout the crate.
//! Transport adapters convert backend failures into these typed variants at
//! their boundary; [`crate::classify`] then maps them onto the user-facing
//! taxonomy without inspecting message text.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chat_session::{Result, SessionController};
//!
//! async fn notice(controller: &SessionController) -> Result<()> {
//!     controller.send_system_notice("joined from mobile").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Credential | [`Error::Unauthenticated`], [`Error::AuthRejected`], [`Error::CredentialMismatch`], [`Error::MalformedCredential`] |
//! | Connection | [`Error::Network`], [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::ConnectionTimeout`] |
//! | Channel | [`Error::ConnectionNotLive`], [`Error::SelfConversation`], [`Error::ChannelRejected`], [`Error::ChannelClosed`] |
//! | Session | [`Error::NotReady`], [`Error::Disposed`], [`Error::Superseded`], [`Error::Cancelled`] |
//! | Protocol | [`Error::Protocol`], [`Error::Remote`], [`Error::Timeout`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |
//!
//! Errors are `Clone`: one connect outcome is delivered to every coalesced
//! caller, so external sources are held behind `Arc`.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{ChannelId, ConnectionId, RequestId, UserId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a builder is missing a required part or an endpoint
    /// is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Credential Errors
    // ========================================================================
    /// The identity is not (or no longer) authenticated with the issuer.
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Issuer-provided detail.
        message: String,
    },

    /// The transport rejected the credential.
    #[error("Authentication rejected: {message}")]
    AuthRejected {
        /// Backend-provided detail.
        message: String,
    },

    /// A credential was presented for a different identity than the one
    /// connecting.
    #[error("Credential issued for {actual}, expected {expected}")]
    CredentialMismatch {
        /// Identity being connected.
        expected: UserId,
        /// Identity the credential was issued for.
        actual: UserId,
    },

    /// The issuer answered with a body that is not a credential.
    #[error("Malformed credential response: {message}")]
    MalformedCredential {
        /// Decoding detail.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Backend unreachable.
    #[error("Network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// Transport connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connect plus authenticate exceeded the bounded timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The connection was released before the operation.
    #[error("Connection {connection_id} is not live")]
    ConnectionNotLive {
        /// The released connection.
        connection_id: ConnectionId,
    },

    /// The conversation target is the connected identity itself.
    #[error("Cannot open a conversation with yourself ({user_id})")]
    SelfConversation {
        /// The offending id.
        user_id: UserId,
    },

    /// The backend refused the join or watch.
    #[error("Channel {channel_id} rejected: {message}")]
    ChannelRejected {
        /// Channel being joined.
        channel_id: ChannelId,
        /// Backend-provided detail.
        message: String,
    },

    /// The channel was unwatched before the operation.
    #[error("Channel {channel_id} is closed")]
    ChannelClosed {
        /// The closed channel.
        channel_id: ChannelId,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// An action that needs a ready session was invoked without one.
    #[error("Session is not ready")]
    NotReady,

    /// The controller has been disposed.
    #[error("Session controller disposed")]
    Disposed,

    /// Newer input made the operation pointless before it started.
    #[error("Superseded by newer input")]
    Superseded,

    /// The task producing a result went away before answering.
    #[error("Operation cancelled")]
    Cancelled(#[from] RecvError),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error response with a code the adapter does not map.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Backend error code.
        code: String,
        /// Backend error message.
        message: String,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Wire request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(Arc<IoError>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<WsError>),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(Arc<reqwest::Error>),
}

// ============================================================================
// External Conversions
// ============================================================================

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unauthenticated error.
    #[inline]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates an authentication rejected error.
    #[inline]
    pub fn auth_rejected(message: impl Into<String>) -> Self {
        Self::AuthRejected {
            message: message.into(),
        }
    }

    /// Creates a malformed credential error.
    #[inline]
    pub fn malformed_credential(message: impl Into<String>) -> Self {
        Self::MalformedCredential {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a channel rejected error.
    #[inline]
    pub fn channel_rejected(channel_id: ChannelId, message: impl Into<String>) -> Self {
        Self::ChannelRejected {
            channel_id,
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } | Self::Timeout { .. } | Self::RequestTimeout { .. } => {
                true
            }
            Self::Http(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if the credential or identity was refused.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. }
                | Self::AuthRejected { .. }
                | Self::CredentialMismatch { .. }
        )
    }

    /// Returns `true` if this is a transport reachability error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
                | Self::WebSocket(_)
                | Self::Http(_)
        )
    }

    /// Returns `true` if this is a join or channel-state error.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotLive { .. }
                | Self::SelfConversation { .. }
                | Self::ChannelRejected { .. }
                | Self::ChannelClosed { .. }
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a bound to the milliseconds carried by timeout errors,
/// saturating at `u64::MAX`.
#[inline]
#[must_use]
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_self_conversation_display() {
        let err = Error::SelfConversation {
            user_id: UserId::new("u1"),
        };
        assert_eq!(err.to_string(), "Cannot open a conversation with yourself (u1)");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(10_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(Error::timeout("channel.watch", 50).is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_auth_error() {
        assert!(Error::unauthenticated("expired session").is_auth_error());
        assert!(Error::auth_rejected("bad token").is_auth_error());
        assert!(!Error::network("down").is_auth_error());
    }

    #[test]
    fn test_is_channel_error() {
        let err = Error::channel_rejected(ChannelId::from_raw("a-b"), "forbidden");
        assert!(err.is_channel_error());
        assert!(!Error::ConnectionClosed.is_channel_error());
    }

    #[test]
    fn test_errors_are_clone() {
        let err: Error = IoError::new(ErrorKind::ConnectionRefused, "refused").into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(cloned.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }
}
