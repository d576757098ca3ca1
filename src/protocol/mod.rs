//! WebSocket protocol message types.
//!
//! Message format spoken by [`crate::transport::WsTransport`]. The session
//! lifecycle never sees these types; they stay behind the transport
//! contract.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Backend | Command request |
//! | `Response` | Backend → Client | Command response |
//! | `Event` | Backend → Client | Channel notification |

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions organized by module.
pub mod command;

/// Event message types.
pub mod event;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{ChannelCommand, Command, ConnectionCommand, MessageCommand};
pub use event::Event;
pub use request::{Request, Response, ResponseType, remote_error};
