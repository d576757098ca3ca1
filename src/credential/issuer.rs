//! Token issuer contract.
//!
//! The issuer is an external service: given a user id it answers with
//! `{token, validForSeconds}`. Implementations report an identity the
//! issuer no longer accepts as [`Error::Unauthenticated`] and transient
//! failures as [`Error::Network`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::UserId;

// ============================================================================
// IssuedToken
// ============================================================================

/// Issuer response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    /// Opaque access token.
    pub token: String,

    /// Lifetime announced by the issuer, if any.
    #[serde(default, rename = "validForSeconds")]
    pub valid_for_seconds: Option<u64>,
}

impl IssuedToken {
    /// Creates a token without an announced lifetime.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            valid_for_seconds: None,
        }
    }

    /// Sets the announced lifetime.
    #[inline]
    #[must_use]
    pub fn valid_for(mut self, seconds: u64) -> Self {
        self.valid_for_seconds = Some(seconds);
        self
    }
}

// ============================================================================
// TokenIssuer
// ============================================================================

/// External service that issues access tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issues a token for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthenticated`] if the identity is not valid anymore
    /// - [`Error::Network`] on transient failure
    /// - [`Error::MalformedCredential`] if the response is not a token
    async fn issue(&self, user_id: &UserId) -> Result<IssuedToken>;
}

// ============================================================================
// StaticTokenIssuer
// ============================================================================

/// Scripted outcome for one user on a [`StaticTokenIssuer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueBehavior {
    /// Issue a fresh token.
    Issue,
    /// Issue a fresh token after a delay.
    Delay(Duration),
    /// Refuse the identity.
    Reject,
    /// Fail as if the issuer were unreachable.
    Fail,
}

/// In-process issuer for tests and offline demos.
///
/// Every successful call issues a distinct token `token-{user}-{n}`.
/// Users without a scripted behavior are issued tokens.
#[derive(Debug, Default)]
pub struct StaticTokenIssuer {
    /// Scripted behavior per user.
    behaviors: Mutex<FxHashMap<UserId, IssueBehavior>>,
    /// Number of `issue` calls, successful or not.
    calls: AtomicUsize,
    /// Announced lifetime for issued tokens.
    valid_for_seconds: Option<u64>,
}

impl StaticTokenIssuer {
    /// Creates an issuer that issues tokens for everyone.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces `seconds` of validity on every issued token.
    #[inline]
    #[must_use]
    pub fn with_validity(mut self, seconds: u64) -> Self {
        self.valid_for_seconds = Some(seconds);
        self
    }

    /// Scripts the outcome for `user_id`.
    pub fn set_behavior(&self, user_id: impl Into<UserId>, behavior: IssueBehavior) {
        self.behaviors.lock().insert(user_id.into(), behavior);
    }

    /// Returns how many times `issue` was called.
    #[inline]
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, user_id: &UserId) -> Result<IssuedToken> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self
            .behaviors
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or(IssueBehavior::Issue);

        debug!(user_id = %user_id, ?behavior, call, "Static issuer called");

        match behavior {
            IssueBehavior::Issue => {}
            IssueBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            IssueBehavior::Reject => {
                return Err(Error::unauthenticated(format!("{user_id} is signed out")));
            }
            IssueBehavior::Fail => return Err(Error::network("token issuer unreachable")),
        }

        Ok(IssuedToken {
            token: format!("token-{user_id}-{call}"),
            valid_for_seconds: self.valid_for_seconds,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
