//! Failure taxonomy for session transitions.
//!
//! [`classify`] maps any crate [`Error`] onto the five [`ErrorKind`]s a
//! session can fail with. The mapping is purely structural: transport
//! adapters already produce typed variants, so nothing here looks at
//! message text.
//!
//! | Kind | Produced by |
//! |------|-------------|
//! | [`ErrorKind::Auth`] | Issuer refusal, credential rejected by transport, credential/identity mismatch |
//! | [`ErrorKind::Timeout`] | Connect, join or wire request deadline exceeded |
//! | [`ErrorKind::Network`] | Backend unreachable, socket closed, IO/HTTP/WebSocket failures |
//! | [`ErrorKind::Channel`] | Join refused, self-conversation, connection or channel released |
//! | [`ErrorKind::Unknown`] | Everything else |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::Error;
use crate::notify::{Notification, Severity};

// ============================================================================
// ErrorKind
// ============================================================================

/// User-facing failure category of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or expired credential or identity.
    Auth,
    /// A bounded operation exceeded its deadline.
    Timeout,
    /// Transport unreachable.
    Network,
    /// Join or permission failure.
    Channel,
    /// Unclassified.
    Unknown,
}

impl ErrorKind {
    /// Returns the short message shown to the user for this kind.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Auth => "Authentication error. Please try logging in again.",
            Self::Timeout => "Connection timed out. Please check your internet and try again.",
            Self::Network => "Could not connect to chat. Please try again.",
            Self::Channel => "Could not open this conversation. Please try again.",
            Self::Unknown => "Something went wrong with chat. Please try again.",
        }
    }

    /// Returns the error notification for this kind.
    #[inline]
    #[must_use]
    pub fn notification(self) -> Notification {
        Notification::new(Severity::Error, self.message())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "AuthError",
            Self::Timeout => "TimeoutError",
            Self::Network => "NetworkError",
            Self::Channel => "ChannelError",
            Self::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

// ============================================================================
// classify
// ============================================================================

/// Maps an error onto its [`ErrorKind`].
#[must_use]
pub fn classify(error: &Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_auth_error() {
        ErrorKind::Auth
    } else if error.is_channel_error() {
        ErrorKind::Channel
    } else if error.is_connection_error() {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::{ChannelId, ConnectionId, RequestId, UserId};

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify(&Error::unauthenticated("no session")), ErrorKind::Auth);
        assert_eq!(classify(&Error::auth_rejected("expired")), ErrorKind::Auth);
        assert_eq!(
            classify(&Error::CredentialMismatch {
                expected: UserId::new("u1"),
                actual: UserId::new("u9"),
            }),
            ErrorKind::Auth
        );
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(classify(&Error::connection_timeout(10_000)), ErrorKind::Timeout);
        assert_eq!(
            classify(&Error::request_timeout(RequestId::generate(), 30_000)),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_classify_network() {
        assert_eq!(classify(&Error::network("dns failure")), ErrorKind::Network);
        assert_eq!(classify(&Error::ConnectionClosed), ErrorKind::Network);
    }

    #[test]
    fn test_classify_channel() {
        assert_eq!(
            classify(&Error::channel_rejected(ChannelId::from_raw("a-b"), "forbidden")),
            ErrorKind::Channel
        );
        assert_eq!(
            classify(&Error::ConnectionNotLive {
                connection_id: ConnectionId::next(),
            }),
            ErrorKind::Channel
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(&Error::protocol("bad frame")), ErrorKind::Unknown);
        assert_eq!(
            classify(&Error::Remote {
                code: "internal".into(),
                message: "boom".into(),
            }),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_message_mentions_login_for_auth() {
        assert!(ErrorKind::Auth.message().contains("logging in"));
        assert!(ErrorKind::Timeout.message().contains("timed out"));
    }

    #[test]
    fn test_notification_is_error_severity() {
        let notification = ErrorKind::Network.notification();
        assert_eq!(notification.severity, Severity::Error);
        assert_eq!(notification.message, ErrorKind::Network.message());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ErrorKind::Auth.to_string(), "AuthError");
        assert_eq!(ErrorKind::Channel.to_string(), "ChannelError");
    }
}
