//! Token issuer reached over HTTP.
//!
//! Issues `GET {base}/chat/token?userId={id}` and decodes
//! `{"token": "...", "validForSeconds": 3600}`.
//!
//! | Outcome | Error |
//! |---------|-------|
//! | 401 / 403 | [`Error::Unauthenticated`] |
//! | Other non-2xx | [`Error::Network`] |
//! | Transport failure | [`Error::Http`] |
//! | Undecodable body | [`Error::MalformedCredential`] |

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::UserId;

use super::issuer::{IssuedToken, TokenIssuer};

// ============================================================================
// Constants
// ============================================================================

/// Path of the token endpoint relative to the base URL.
const TOKEN_PATH: &str = "chat/token";

/// Environment variable holding the issuer base URL.
pub const TOKEN_URL_ENV: &str = "CHAT_TOKEN_URL";

/// Environment variable holding an optional bearer token for the issuer.
pub const AUTH_TOKEN_ENV: &str = "CHAT_AUTH_TOKEN";

/// Request timeout for the issuer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// HttpTokenIssuer
// ============================================================================

/// [`TokenIssuer`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    /// HTTP client.
    client: Client,
    /// Token endpoint.
    endpoint: Url,
    /// Bearer token proving the caller's identity to the issuer.
    bearer: Option<String>,
}

impl HttpTokenIssuer {
    /// Creates an issuer for `base_url`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is invalid or cannot be a base
    /// - [`Error::Http`] if the client cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid token issuer URL {base_url}: {e}")))?;

        if base.cannot_be_a_base() {
            return Err(Error::config(format!(
                "Token issuer URL cannot be a base: {base_url}"
            )));
        }

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let endpoint = base
            .join(TOKEN_PATH)
            .map_err(|e| Error::config(format!("Invalid token issuer URL {base_url}: {e}")))?;

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint,
            bearer: None,
        })
    }

    /// Creates an issuer from [`TOKEN_URL_ENV`] and, if set,
    /// [`AUTH_TOKEN_ENV`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if [`TOKEN_URL_ENV`] is unset or invalid
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(TOKEN_URL_ENV)
            .map_err(|_| Error::config(format!("{TOKEN_URL_ENV} is not set")))?;

        let issuer = Self::new(&base_url)?;
        Ok(match env::var(AUTH_TOKEN_ENV) {
            Ok(bearer) if !bearer.is_empty() => issuer.with_bearer(bearer),
            _ => issuer,
        })
    }

    /// Sends `bearer` as the `Authorization` header.
    #[inline]
    #[must_use]
    pub fn with_bearer(mut self, bearer: impl Into<String>) -> Self {
        self.bearer = Some(bearer.into());
        self
    }

    /// Returns the token endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, user_id: &UserId) -> Result<IssuedToken> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&[("userId", user_id.as_str())]);

        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(user_id = %user_id, %status, "Token issuer responded");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::unauthenticated(format!(
                    "token issuer refused {user_id} ({status})"
                )));
            }
            status if !status.is_success() => {
                return Err(Error::network(format!("token issuer returned {status}")));
            }
            _ => {}
        }

        let body = response.text().await?;
        serde_json::from_str::<IssuedToken>(&body)
            .map_err(|e| Error::malformed_credential(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
