//! Observable session state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::classify::ErrorKind;

use super::binder::Channel;
use super::supervisor::Connection;

// ============================================================================
// ReadySession
// ============================================================================

/// Connection and channel of a ready session.
#[derive(Debug, Clone)]
pub struct ReadySession {
    /// Authenticated connection.
    pub connection: Connection,
    /// Joined channel, bound to `connection`.
    pub channel: Channel,
}

// ============================================================================
// SessionState
// ============================================================================

/// State of a [`crate::SessionController`].
///
/// | State | Meaning |
/// |-------|---------|
/// | `Idle` | Identity or target missing, or disposed |
/// | `Connecting` | Credential, connect and join in progress |
/// | `Ready` | Connection authenticated and channel joined |
/// | `Failed` | Last transition failed |
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// Nothing to do.
    #[default]
    Idle,
    /// Transition in progress.
    Connecting,
    /// Session ready.
    Ready(ReadySession),
    /// Transition failed.
    Failed(ErrorKind),
}

impl SessionState {
    /// Returns `true` if idle.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns `true` while a transition runs.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Returns `true` if ready.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns the ready session, if any.
    #[inline]
    #[must_use]
    pub fn ready(&self) -> Option<&ReadySession> {
        match self {
            Self::Ready(ready) => Some(ready),
            _ => None,
        }
    }

    /// Returns the failure kind, if failed.
    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` once a transition has settled.
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_connecting()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Ready(ready) => write!(f, "Ready({})", ready.channel.id()),
            Self::Failed(kind) => write!(f, "Failed({kind})"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
