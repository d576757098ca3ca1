//! Builder for [`SessionController`].
//!
//! # Example
//!
//! ```no_run
//! use chat_session::credential::HttpTokenIssuer;
//! use chat_session::transport::WsTransport;
//! use chat_session::SessionController;
//!
//! # async fn example() -> chat_session::Result<()> {
//! let controller = SessionController::builder()
//!     .issuer(HttpTokenIssuer::from_env()?)
//!     .transport(WsTransport::from_env()?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::credential::{CredentialSource, TokenIssuer};
use crate::error::{Error, Result};
use crate::notify::{Notifier, TracingNotifier};
use crate::transport::Transport;

use super::binder::ChannelBinder;
use super::controller::SessionController;
use super::options::SessionOptions;
use super::supervisor::ConnectionSupervisor;

// ============================================================================
// SessionControllerBuilder
// ============================================================================

/// Builder for configuring a [`SessionController`].
///
/// Use [`SessionController::builder()`] to create one.
#[derive(Default)]
pub struct SessionControllerBuilder {
    /// Token issuer.
    issuer: Option<Arc<dyn TokenIssuer>>,
    /// Transport.
    transport: Option<Arc<dyn Transport>>,
    /// Notification sink.
    notifier: Option<Arc<dyn Notifier>>,
    /// Timeouts and channel settings.
    options: SessionOptions,
}

impl fmt::Debug for SessionControllerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionControllerBuilder")
            .field("issuer", &self.issuer.is_some())
            .field("transport", &self.transport.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl SessionControllerBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the token issuer.
    #[inline]
    #[must_use]
    pub fn issuer(self, issuer: impl TokenIssuer + 'static) -> Self {
        self.shared_issuer(Arc::new(issuer))
    }

    /// Sets a token issuer the caller keeps a handle to.
    #[inline]
    #[must_use]
    pub fn shared_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    /// Sets a transport the caller keeps a handle to.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the notification sink. Defaults to [`TracingNotifier`].
    #[inline]
    #[must_use]
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Sets timeouts and channel settings.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the controller and spawns its driver task.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the issuer or transport is missing, or a
    /// timeout is zero.
    pub fn build(self) -> Result<SessionController> {
        let issuer = self.issuer.ok_or_else(|| {
            Error::config(
                "Token issuer is required. Use .issuer() to set it.\n\
                 Example: SessionController::builder().issuer(HttpTokenIssuer::from_env()?)",
            )
        })?;

        let transport = self.transport.ok_or_else(|| {
            Error::config(
                "Transport is required. Use .transport() to set it.\n\
                 Example: SessionController::builder().transport(WsTransport::from_env()?)",
            )
        })?;

        Self::validate_options(&self.options)?;

        let options = self.options;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        Ok(SessionController::spawn(
            CredentialSource::with_freshness(issuer, options.credential_freshness),
            ConnectionSupervisor::new(transport, options.connect_timeout),
            ChannelBinder::new(options.channel_kind, options.join_timeout),
            notifier,
        ))
    }

    /// Rejects options no session could work with.
    fn validate_options(options: &SessionOptions) -> Result<()> {
        if options.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        if options.join_timeout.is_zero() {
            return Err(Error::config("Join timeout must be greater than zero"));
        }
        if options.channel_kind.is_empty() {
            return Err(Error::config("Channel type must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
