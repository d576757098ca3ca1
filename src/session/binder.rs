//! Channel binder.
//!
//! Joins the two-party channel between a connection's identity and a
//! conversation target. The channel id is derived, never chosen, so both
//! participants always land in the same channel.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result, duration_millis};
use crate::identifiers::{ChannelId, MessageId, SubscriptionId, UserId};
use crate::transport::{ChannelEvent, ChannelSnapshot, WatchRequest};

use super::supervisor::Connection;

// ============================================================================
// Channel
// ============================================================================

/// A joined and watched conversation channel.
///
/// Bound to one [`Connection`]. Clones refer to the same subscription.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: ChannelId,
    subscription: SubscriptionId,
    members: Vec<UserId>,
    snapshot: ChannelSnapshot,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    connection: Connection,
    closed: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("connection", &self.inner.connection.id())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.inner.id
    }

    /// Returns the two participants.
    #[inline]
    #[must_use]
    pub fn members(&self) -> &[UserId] {
        &self.inner.members
    }

    /// Returns the channel state at join time.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> &ChannelSnapshot {
        &self.inner.snapshot
    }

    /// Returns the connection the channel is bound to.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns `true` while neither the channel nor its connection is
    /// released.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.connection.is_live()
    }

    /// Takes the live event stream. Only the first call gets it.
    ///
    /// The stream starts right after [`Channel::snapshot`].
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.inner.events.lock().take()
    }

    /// Posts `text` to the channel.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if the channel was closed
    /// - [`Error::ConnectionNotLive`] if the connection was released
    pub async fn send_message(&self, text: &str) -> Result<MessageId> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed {
                channel_id: self.inner.id.clone(),
            });
        }
        self.inner.connection.require_live()?;

        self.inner
            .connection
            .session()
            .send_message(&self.inner.id, text)
            .await
    }

    /// Stops this channel's subscription. Idempotent; failures are logged.
    ///
    /// Other channels watching the same id on the same connection keep
    /// their events.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.events.lock().take();

        // A released connection took its subscriptions with it.
        if !self.inner.connection.is_live() {
            return;
        }

        match self
            .inner
            .connection
            .session()
            .unwatch(&self.inner.id, self.inner.subscription)
            .await
        {
            Ok(()) => debug!(channel_id = %self.inner.id, "Channel closed"),
            Err(e) => warn!(channel_id = %self.inner.id, error = %e, "Unwatch failed"),
        }
    }
}

// ============================================================================
// ChannelBinder
// ============================================================================

/// Joins two-party channels on a [`Connection`].
#[derive(Debug, Clone)]
pub struct ChannelBinder {
    /// Channel type sent on join.
    kind: String,
    /// Bound on a join.
    join_timeout: Duration,
}

impl ChannelBinder {
    /// Creates a binder.
    #[must_use]
    pub fn new(kind: impl Into<String>, join_timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            join_timeout,
        }
    }

    /// Joins and watches the channel between `connection`'s identity and
    /// `target`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotLive`] if `connection` was released
    /// - [`Error::SelfConversation`] if `target` is the connected identity
    /// - [`Error::ChannelRejected`] if the backend refuses the join
    /// - [`Error::Timeout`] if the join exceeds the bound
    pub async fn join(&self, connection: &Connection, target: &UserId) -> Result<Channel> {
        connection.require_live()?;

        let me = &connection.identity().id;
        if me == target {
            return Err(Error::SelfConversation {
                user_id: target.clone(),
            });
        }

        let channel_id = ChannelId::derive(me, target);
        let members = vec![me.clone(), target.clone()];
        let request = WatchRequest {
            kind: self.kind.clone(),
            channel_id: channel_id.clone(),
            members: members.clone(),
        };

        let watch = match timeout(self.join_timeout, connection.session().watch(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(
                    format!("join channel {channel_id}"),
                    duration_millis(self.join_timeout),
                ));
            }
        };

        debug!(
            channel_id = %channel_id,
            connection_id = %connection.id(),
            messages = watch.snapshot.messages.len(),
            "Channel joined"
        );

        Ok(Channel {
            inner: Arc::new(ChannelInner {
                id: channel_id,
                subscription: watch.subscription,
                members,
                snapshot: watch.snapshot,
                events: Mutex::new(Some(watch.events)),
                connection: connection.clone(),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
