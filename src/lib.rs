//! Chat session - Session lifecycle manager for real-time two-party chat.
//!
//! This library connects an authenticated end user to a messaging backend,
//! joins the conversation channel shared with another user, and keeps that
//! connection consistent while the identity or the conversation changes.
//!
//! # Architecture
//!
//! ```text
//! identity + target
//!        │
//!        ▼
//! ┌───────────────────┐   fetch   ┌──────────────────┐
//! │ SessionController │──────────►│ CredentialSource │──► TokenIssuer
//! │  (driver task)    │           └──────────────────┘
//! │                   │  ensure   ┌──────────────────────┐
//! │                   │──────────►│ ConnectionSupervisor │──► Transport
//! │                   │   join    ├──────────────────────┤
//! │                   │──────────►│ ChannelBinder        │
//! └───────────────────┘           └──────────────────────┘
//!        │
//!        ▼
//! SessionState: Idle | Connecting | Ready | Failed
//! ```
//!
//! Key design principles:
//!
//! - One driver task owns all state; transitions never mutate it
//! - Every input change starts a new generation; stale results are dropped
//! - At most one live connection per controller
//! - Errors are typed at the transport boundary and classified for users
//!
//! # Quick Start
//!
//! ```no_run
//! use chat_session::credential::HttpTokenIssuer;
//! use chat_session::transport::WsTransport;
//! use chat_session::{Identity, Result, SessionController, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller = SessionController::builder()
//!         .issuer(HttpTokenIssuer::from_env()?)
//!         .transport(WsTransport::from_env()?)
//!         .build()?;
//!
//!     controller.set_identity(Some(Identity::new("u1", "Ada")))?;
//!     controller.set_target(Some(UserId::new("u2")))?;
//!
//!     let state = controller
//!         .wait_for(|state| state.is_ready() || state.failure().is_some())
//!         .await?;
//!     println!("Session: {state}");
//!
//!     if state.is_ready() {
//!         controller.announce_call("https://chat.example.com").await?;
//!     }
//!
//!     controller.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | Controller, supervisor, binder and state |
//! | [`credential`] | Access tokens and issuers |
//! | [`transport`] | Transport contract, in-memory and WebSocket adapters |
//! | [`classify`] | Error taxonomy for users |
//! | [`notify`] | Notification sink |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | WebSocket message types (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Error taxonomy shown to users.
pub mod classify;

/// Short-lived access credentials.
///
/// Use [`credential::CredentialSource`] to cache tokens per identity.
pub mod credential;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for session entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Authenticated end-user identity.
pub mod identity;

/// Notification sink.
pub mod notify;

/// WebSocket protocol message types.
///
/// Internal module defining request/response/event structures.
pub mod protocol;

/// Session lifecycle.
///
/// Use [`SessionController::builder()`] to create a controller.
pub mod session;

/// Transport layer.
///
/// The contract the session talks through, plus in-memory and WebSocket
/// implementations.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    Channel, ChannelBinder, Connection, ConnectionSupervisor, ReadySession, SessionController,
    SessionControllerBuilder, SessionOptions, SessionState,
};

// Classification
pub use classify::{ErrorKind, classify};

// Credential types
pub use credential::{Credential, CredentialSource, TokenIssuer};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelId, ConnectionId, Generation, MessageId, SubscriptionId, UserId};

// Identity
pub use identity::Identity;

// Notification types
pub use notify::{Notification, Notifier, Severity};

// Transport contract
pub use transport::{Transport, TransportSession};
