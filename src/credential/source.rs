//! Credential cache with a freshness window.
//!
//! [`CredentialSource`] remembers the last credential issued per identity
//! and hands it out again until it goes stale. A credential is stale once
//! the configured window (5 minutes by default) or the issuer's own
//! `validForSeconds`, whichever is shorter, has elapsed, or after
//! [`CredentialSource::invalidate`].
//!
//! There is no backoff here. A failed fetch leaves the cache untouched and
//! the next call goes straight back to the issuer.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::identity::Identity;

use super::issuer::TokenIssuer;

// ============================================================================
// Constants
// ============================================================================

/// Default freshness window for cached credentials.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// AccessToken
// ============================================================================

/// Opaque access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for the wire.
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

// ============================================================================
// Credential
// ============================================================================

/// An access token bound to the identity it was issued for.
///
/// Never mutated; a refresh produces a new value.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Identity the token was issued for.
    user_id: UserId,
    /// The token.
    token: AccessToken,
    /// When the token was received.
    issued_at: Instant,
    /// Lifetime announced by the issuer.
    valid_for: Option<Duration>,
}

impl Credential {
    /// Creates a credential issued now.
    #[must_use]
    pub fn new(user_id: UserId, token: AccessToken, valid_for: Option<Duration>) -> Self {
        Self {
            user_id,
            token,
            issued_at: Instant::now(),
            valid_for,
        }
    }

    /// Returns the identity the credential belongs to.
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Returns `true` while the credential is inside `window` and its own
    /// announced lifetime.
    #[must_use]
    pub fn is_fresh(&self, window: Duration) -> bool {
        let limit = match self.valid_for {
            Some(valid_for) => window.min(valid_for),
            None => window,
        };
        self.issued_at.elapsed() < limit
    }
}

// ============================================================================
// CredentialSource
// ============================================================================

/// Fetches and caches credentials per identity.
pub struct CredentialSource {
    /// External issuer.
    issuer: Arc<dyn TokenIssuer>,
    /// Freshness window.
    freshness: Duration,
    /// Last credential per identity.
    cache: Mutex<FxHashMap<UserId, Credential>>,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("freshness", &self.freshness)
            .field("cached", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl CredentialSource {
    /// Creates a source with the default 5 minute window.
    #[inline]
    #[must_use]
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self::with_freshness(issuer, DEFAULT_FRESHNESS)
    }

    /// Creates a source with a custom freshness window.
    #[must_use]
    pub fn with_freshness(issuer: Arc<dyn TokenIssuer>, freshness: Duration) -> Self {
        Self {
            issuer,
            freshness,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns a fresh credential for `identity`.
    ///
    /// Served from cache while fresh; otherwise fetched from the issuer and
    /// cached.
    ///
    /// # Errors
    ///
    /// Whatever the issuer reports, plus [`Error::MalformedCredential`]
    /// for an empty token.
    pub async fn fetch(&self, identity: &Identity) -> Result<Credential> {
        if let Some(credential) = self.cached(&identity.id) {
            trace!(user_id = %identity.id, "Credential served from cache");
            return Ok(credential);
        }

        let issued = self.issuer.issue(&identity.id).await?;
        if issued.token.is_empty() {
            return Err(Error::malformed_credential("issuer returned an empty token"));
        }

        let credential = Credential::new(
            identity.id.clone(),
            AccessToken::new(issued.token),
            issued.valid_for_seconds.map(Duration::from_secs),
        );

        self.cache
            .lock()
            .insert(identity.id.clone(), credential.clone());

        debug!(
            user_id = %identity.id,
            valid_for = ?issued.valid_for_seconds,
            "Credential fetched"
        );

        Ok(credential)
    }

    /// Returns the cached credential for `user_id` if still fresh.
    #[must_use]
    pub fn cached(&self, user_id: &UserId) -> Option<Credential> {
        let cache = self.cache.lock();
        cache
            .get(user_id)
            .filter(|credential| credential.is_fresh(self.freshness))
            .cloned()
    }

    /// Drops the cached credential for `user_id`.
    pub fn invalidate(&self, user_id: &UserId) {
        if self.cache.lock().remove(user_id).is_some() {
            debug!(user_id = %user_id, "Credential invalidated");
        }
    }

    /// Drops every cached credential.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
