//! Short-lived access credentials.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CredentialSource`] | Per-identity cache with a freshness window |
//! | [`Credential`] | Token bound to the identity it was issued for |
//! | [`TokenIssuer`] | External token-issuing service |
//! | [`HttpTokenIssuer`] | Issuer reached over HTTP |
//! | [`StaticTokenIssuer`] | In-process issuer for tests and demos |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP token issuer.
pub mod http;

/// Token issuer contract and in-process implementation.
pub mod issuer;

/// Credential cache.
pub mod source;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::HttpTokenIssuer;
pub use issuer::{IssueBehavior, IssuedToken, StaticTokenIssuer, TokenIssuer};
pub use source::{AccessToken, Credential, CredentialSource, DEFAULT_FRESHNESS};
