//! Session lifecycle.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SessionController`] | State machine owning the session |
//! | [`ConnectionSupervisor`] | At most one live connection, coalesced connects |
//! | [`ChannelBinder`] | Joins the two-party channel |
//! | [`SessionState`] | Observable state |
//! | [`SessionOptions`] | Timeouts and channel settings |

// ============================================================================
// Submodules
// ============================================================================

/// Channel join and handle.
pub mod binder;

/// Controller builder.
pub mod builder;

/// Controller and driver task.
pub mod controller;

/// Tuning options.
pub mod options;

/// Observable state.
pub mod state;

/// Connection ownership.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use binder::{Channel, ChannelBinder};
pub use builder::SessionControllerBuilder;
pub use controller::{CALL_LINK_SENT, SessionController};
pub use options::{
    DEFAULT_CHANNEL_KIND, DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOIN_TIMEOUT, SessionOptions,
};
pub use state::{ReadySession, SessionState};
pub use supervisor::{Connection, ConnectionSupervisor};
