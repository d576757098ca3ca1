//! Transport layer.
//!
//! The session lifecycle talks to the messaging backend only through the
//! [`Transport`] / [`TransportSession`] contract. Two implementations ship
//! with the crate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                     ┌─────────────────┐
//! │ ConnectionSupervisor │   Transport::open   │ Messaging       │
//! │  → TransportSession  │◄───────────────────►│ backend         │
//! │ ChannelBinder        │  authenticate/watch │                 │
//! └──────────────────────┘                     └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `contract` | Traits and channel data types |
//! | `memory` | In-process backend for tests and demos |
//! | `websocket` | WebSocket adapter with request correlation |

// ============================================================================
// Submodules
// ============================================================================

/// Transport traits and channel data.
pub mod contract;

/// In-process backend.
pub mod memory;

/// WebSocket adapter.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use contract::{
    ChannelEvent, ChannelSnapshot, ChatMessage, Transport, TransportSession, Watch, WatchRequest,
};
pub use memory::{JoinBehavior, JoinGate, MemoryTransport, OpenBehavior};
pub use websocket::{WsSession, WsTransport};
