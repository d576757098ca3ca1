//! User-visible notifications.
//!
//! The session controller reports failures and a few successes as
//! `(severity, message)` pairs to a [`Notifier`]. What the host does with
//! them (toasts, status bar, nothing) is its own business.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

// ============================================================================
// Severity
// ============================================================================

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The user's action completed.
    Success,
    /// The session failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A short message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// How the message should be presented.
    pub severity: Severity,
    /// Text shown to the user.
    pub message: String,
}

impl Notification {
    /// Creates a notification.
    #[inline]
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Creates a success notification.
    #[inline]
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Receiver of user-visible notifications.
///
/// Called from the controller's driver task; implementations must not block.
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, notification: Notification);
}

/// Notifier that writes notifications to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Success => info!(message = %notification.message, "Notification"),
            Severity::Error => warn!(message = %notification.message, "Notification"),
        }
    }
}

/// Notifier that keeps every notification in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    /// Delivered notifications, oldest first.
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything delivered so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.delivered.lock().push(notification);
    }
}

// ============================================================================
// Tests
// ============================================================================
