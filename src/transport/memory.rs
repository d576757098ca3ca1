//! In-process messaging backend.
//!
//! [`MemoryTransport`] implements the transport contract without a network.
//! It keeps channels, members and messages in memory, fans `message.new`
//! out to watchers, and counts sessions so callers can check that nothing
//! leaks:
//!
//! | Counter | Meaning |
//! |---------|---------|
//! | [`MemoryTransport::opened`] | Sessions ever opened |
//! | [`MemoryTransport::live`] | Sessions open right now |
//! | [`MemoryTransport::peak_live`] | Highest `live` ever observed |
//!
//! Opening and joining can be scripted ([`OpenBehavior`], [`JoinBehavior`])
//! to reproduce slow, stuck or refusing backends.
//!
//! # Example
//!
//! ```
//! use chat_session::transport::{JoinBehavior, MemoryTransport};
//! use chat_session::{ChannelId, UserId};
//!
//! let transport = MemoryTransport::new();
//! let channel = ChannelId::derive(&UserId::new("u1"), &UserId::new("u2"));
//! transport.set_join_behavior(channel, JoinBehavior::Reject);
//! assert_eq!(transport.live(), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::credential::AccessToken;
use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, MessageId, SubscriptionId, UserId};
use crate::identity::Identity;

use super::contract::{
    ChannelEvent, ChannelSnapshot, ChatMessage, Transport, TransportSession, Watch, WatchRequest,
};

// ============================================================================
// Behaviors
// ============================================================================

/// Scripted outcome of [`Transport::open`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open at once.
    #[default]
    Immediate,
    /// Open after a delay.
    Delay(Duration),
    /// Never finish opening.
    Stall,
    /// Fail as unreachable.
    Fail,
}

/// Scripted outcome of [`TransportSession::watch`] for one channel.
#[derive(Debug, Clone, Default)]
pub enum JoinBehavior {
    /// Join at once.
    #[default]
    Immediate,
    /// Join after a delay.
    Delay(Duration),
    /// Join once the gate opens.
    Gate(JoinGate),
    /// Never finish joining.
    Stall,
    /// Refuse the join.
    Reject,
}

/// Manually released barrier for [`JoinBehavior::Gate`].
///
/// Clones share the same barrier. Once opened it stays open.
#[derive(Clone)]
pub struct JoinGate {
    /// `true` once opened.
    state: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for JoinGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinGate")
            .field("open", &*self.state.borrow())
            .finish()
    }
}

impl Default for JoinGate {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinGate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Opens the gate, releasing current and future waiters.
    pub fn open(&self) {
        self.state.send_replace(true);
    }

    /// Waits until the gate is open.
    async fn wait(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

// ============================================================================
// Backend State
// ============================================================================

/// One watcher subscription.
struct Watcher {
    /// Session that owns the subscription.
    session: u64,
    /// Subscription handle.
    subscription: SubscriptionId,
    /// Event sink.
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// One channel.
#[derive(Default)]
struct MemoryChannel {
    /// Member set fixed at creation.
    members: Vec<UserId>,
    /// Every message, oldest first.
    messages: Vec<ChatMessage>,
    /// Active subscriptions.
    watchers: Vec<Watcher>,
}

/// Shared backend state.
#[derive(Default)]
struct Backend {
    opened: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    authenticated: AtomicUsize,
    watch_calls: AtomicUsize,
    next_session: AtomicU64,
    next_message: AtomicU64,
    open_behavior: Mutex<OpenBehavior>,
    rejected_users: Mutex<FxHashSet<UserId>>,
    join_behaviors: Mutex<FxHashMap<ChannelId, JoinBehavior>>,
    channels: Mutex<FxHashMap<ChannelId, MemoryChannel>>,
}

impl Backend {
    /// Appends a message and fans it out to watchers.
    fn post(&self, channel_id: &ChannelId, user: &UserId, text: &str) -> Result<MessageId> {
        let id = MessageId::new(format!(
            "msg-{}",
            self.next_message.fetch_add(1, Ordering::Relaxed) + 1
        ));

        let mut channels = self.channels.lock();
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| Error::channel_rejected(channel_id.clone(), "no such channel"))?;

        if !channel.members.contains(user) {
            return Err(Error::channel_rejected(
                channel_id.clone(),
                format!("{user} is not a member"),
            ));
        }

        let message = ChatMessage {
            id: id.clone(),
            user: user.clone(),
            text: text.to_string(),
        };
        channel.messages.push(message.clone());
        channel
            .watchers
            .retain(|watcher| watcher.tx.send(ChannelEvent::MessageNew(message.clone())).is_ok());

        trace!(channel_id = %channel_id, message_id = %id, "Message posted");
        Ok(id)
    }

    /// Drops every subscription owned by `session`.
    fn drop_watchers(&self, session: u64) {
        for channel in self.channels.lock().values_mut() {
            channel.watchers.retain(|watcher| watcher.session != session);
        }
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// In-process [`Transport`].
///
/// Clones share the same backend.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    /// Shared backend.
    backend: Arc<Backend>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("opened", &self.opened())
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Creates an empty backend.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts how subsequent `open` calls behave.
    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *self.backend.open_behavior.lock() = behavior;
    }

    /// Makes authentication fail for `user_id`.
    pub fn reject_user(&self, user_id: impl Into<UserId>) {
        self.backend.rejected_users.lock().insert(user_id.into());
    }

    /// Scripts how joins of `channel_id` behave.
    pub fn set_join_behavior(&self, channel_id: ChannelId, behavior: JoinBehavior) {
        self.backend
            .join_behaviors
            .lock()
            .insert(channel_id, behavior);
    }

    /// Holds joins of `channel_id` until the returned gate opens.
    #[must_use]
    pub fn gate_join(&self, channel_id: ChannelId) -> JoinGate {
        let gate = JoinGate::new();
        self.set_join_behavior(channel_id, JoinBehavior::Gate(gate.clone()));
        gate
    }

    /// Posts a message as `user` without a session, e.g. the other
    /// participant.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelRejected`] if the channel does not exist or `user`
    /// is not a member.
    pub fn post_message(
        &self,
        channel_id: &ChannelId,
        user: &UserId,
        text: &str,
    ) -> Result<MessageId> {
        self.backend.post(channel_id, user, text)
    }

    /// Returns every message of `channel_id`.
    #[must_use]
    pub fn messages(&self, channel_id: &ChannelId) -> Vec<ChatMessage> {
        self.backend
            .channels
            .lock()
            .get(channel_id)
            .map(|channel| channel.messages.clone())
            .unwrap_or_default()
    }

    /// Returns the members of `channel_id`.
    #[must_use]
    pub fn members(&self, channel_id: &ChannelId) -> Vec<UserId> {
        self.backend
            .channels
            .lock()
            .get(channel_id)
            .map(|channel| channel.members.clone())
            .unwrap_or_default()
    }

    /// Returns the number of active subscriptions on `channel_id`.
    #[must_use]
    pub fn watcher_count(&self, channel_id: &ChannelId) -> usize {
        self.backend
            .channels
            .lock()
            .get(channel_id)
            .map_or(0, |channel| channel.watchers.len())
    }

    /// Sessions ever opened.
    #[inline]
    #[must_use]
    pub fn opened(&self) -> usize {
        self.backend.opened.load(Ordering::SeqCst)
    }

    /// Sessions open right now.
    #[inline]
    #[must_use]
    pub fn live(&self) -> usize {
        self.backend.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions.
    #[inline]
    #[must_use]
    pub fn peak_live(&self) -> usize {
        self.backend.peak_live.load(Ordering::SeqCst)
    }

    /// Successful authentications.
    #[inline]
    #[must_use]
    pub fn authenticated(&self) -> usize {
        self.backend.authenticated.load(Ordering::SeqCst)
    }

    /// Watch calls that reached the channel (after scripted behavior).
    #[inline]
    #[must_use]
    pub fn watch_calls(&self) -> usize {
        self.backend.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Box<dyn TransportSession>> {
        let behavior = self.backend.open_behavior.lock().clone();
        match behavior {
            OpenBehavior::Immediate => {}
            OpenBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            OpenBehavior::Stall => std::future::pending::<()>().await,
            OpenBehavior::Fail => return Err(Error::network("memory backend unreachable")),
        }

        let id = self.backend.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        self.backend.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.backend.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.peak_live.fetch_max(live, Ordering::SeqCst);

        debug!(session = id, live, "Memory session opened");

        Ok(Box::new(MemorySession {
            id,
            backend: Arc::clone(&self.backend),
            user: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// MemorySession
// ============================================================================

/// Session on a [`MemoryTransport`]. Dropping it closes it.
struct MemorySession {
    /// Session number.
    id: u64,
    /// Shared backend.
    backend: Arc<Backend>,
    /// Authenticated user.
    user: Mutex<Option<UserId>>,
    /// Closed flag.
    closed: AtomicBool,
}

impl MemorySession {
    /// Closes the session once. Returns `true` on the first call.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.backend.live.fetch_sub(1, Ordering::SeqCst);
        self.backend.drop_watchers(self.id);
        debug!(session = self.id, "Memory session closed");
        true
    }

    /// Returns the authenticated user of an open session.
    fn require_user(&self) -> Result<UserId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.user
            .lock()
            .clone()
            .ok_or_else(|| Error::auth_rejected("session is not authenticated"))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn authenticate(&self, user: &Identity, token: &AccessToken) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        if token.expose().is_empty() {
            return Err(Error::auth_rejected("empty token"));
        }
        if self.backend.rejected_users.lock().contains(&user.id) {
            return Err(Error::auth_rejected(format!("token for {} was revoked", user.id)));
        }

        *self.user.lock() = Some(user.id.clone());
        self.backend.authenticated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn watch(&self, request: WatchRequest) -> Result<Watch> {
        let user = self.require_user()?;
        if !request.members.contains(&user) {
            return Err(Error::channel_rejected(
                request.channel_id,
                "caller must be a member",
            ));
        }

        let behavior = self
            .backend
            .join_behaviors
            .lock()
            .get(&request.channel_id)
            .cloned()
            .unwrap_or_default();

        match behavior {
            JoinBehavior::Immediate => {}
            JoinBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            JoinBehavior::Gate(gate) => gate.wait().await,
            JoinBehavior::Stall => std::future::pending::<()>().await,
            JoinBehavior::Reject => {
                return Err(Error::channel_rejected(request.channel_id, "forbidden"));
            }
        }

        // Closed while waiting on the scripted behavior.
        self.require_user()?;
        self.backend.watch_calls.fetch_add(1, Ordering::SeqCst);

        let (tx, events) = mpsc::unbounded_channel();
        let subscription = SubscriptionId::next();
        let mut channels = self.backend.channels.lock();
        let channel = channels
            .entry(request.channel_id.clone())
            .or_insert_with(|| MemoryChannel {
                members: request.members.clone(),
                ..MemoryChannel::default()
            });

        if !channel.members.contains(&user) {
            return Err(Error::channel_rejected(
                request.channel_id,
                format!("{user} is not a member"),
            ));
        }

        channel.watchers.push(Watcher {
            session: self.id,
            subscription,
            tx,
        });

        let snapshot = ChannelSnapshot {
            members: channel.members.clone(),
            messages: channel.messages.clone(),
        };

        Ok(Watch {
            subscription,
            snapshot,
            events,
        })
    }

    async fn unwatch(&self, channel_id: &ChannelId, subscription: SubscriptionId) -> Result<()> {
        if let Some(channel) = self.backend.channels.lock().get_mut(channel_id) {
            channel.watchers.retain(|watcher| {
                watcher.session != self.id || watcher.subscription != subscription
            });
        }
        Ok(())
    }

    async fn send_message(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId> {
        let user = self.require_user()?;
        self.backend.post(channel_id, &user, text)
    }

    async fn disconnect(&self) -> Result<()> {
        self.close();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn watch_request(a: &str, b: &str) -> WatchRequest {
        let a = UserId::new(a);
        let b = UserId::new(b);
        WatchRequest {
            kind: "messaging".into(),
            channel_id: ChannelId::derive(&a, &b),
            members: vec![a, b],
        }
    }

    async fn authenticated(transport: &MemoryTransport, user: &str) -> Box<dyn TransportSession> {
        let session = transport.open().await.unwrap();
        session
            .authenticate(&Identity::new(user, user), &AccessToken::new("t"))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_live_count_tracks_disconnect_and_drop() {
        let transport = MemoryTransport::new();

        let first = transport.open().await.unwrap();
        let second = transport.open().await.unwrap();
        assert_eq!(transport.live(), 2);
        assert_eq!(transport.peak_live(), 2);

        first.disconnect().await.unwrap();
        first.disconnect().await.unwrap();
        assert_eq!(transport.live(), 1);

        drop(second);
        assert_eq!(transport.live(), 0);
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn test_rejected_user_cannot_authenticate() {
        let transport = MemoryTransport::new();
        transport.reject_user("u1");

        let session = transport.open().await.unwrap();
        let err = session
            .authenticate(&Identity::new("u1", "Ada"), &AccessToken::new("t"))
            .await
            .unwrap_err();

        assert!(err.is_auth_error());
        assert_eq!(transport.authenticated(), 0);
    }

    #[tokio::test]
    async fn test_watch_returns_snapshot_and_events() {
        let transport = MemoryTransport::new();
        let session = authenticated(&transport, "u1").await;
        let request = watch_request("u1", "u2");
        let channel_id = request.channel_id.clone();

        let first = session.watch(request.clone()).await.unwrap();
        assert!(first.snapshot.messages.is_empty());
        assert_eq!(transport.members(&channel_id).len(), 2);

        transport
            .post_message(&channel_id, &UserId::new("u2"), "hello")
            .unwrap();

        let mut watch = session.watch(request).await.unwrap();
        assert_eq!(watch.snapshot.messages.len(), 1);

        session.send_message(&channel_id, "hi back").await.unwrap();
        match watch.events.recv().await {
            Some(ChannelEvent::MessageNew(message)) => assert_eq!(message.text, "hi back"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outsider_is_rejected() {
        let transport = MemoryTransport::new();
        let owner = authenticated(&transport, "u1").await;
        owner.watch(watch_request("u1", "u2")).await.unwrap();

        let outsider = authenticated(&transport, "u3").await;
        let mut request = watch_request("u1", "u2");
        request.members.push(UserId::new("u3"));

        let err = outsider.watch(request).await.unwrap_err();
        assert!(err.is_channel_error());
    }

    #[tokio::test]
    async fn test_gate_holds_join_until_open() {
        let transport = MemoryTransport::new();
        let request = watch_request("u1", "u2");
        let gate = transport.gate_join(request.channel_id.clone());
        let session = authenticated(&transport, "u1").await;

        let join = tokio::spawn(async move { session.watch(request).await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!join.is_finished());
        assert_eq!(transport.watch_calls(), 0);

        gate.open();
        join.await.unwrap().unwrap();
        assert_eq!(transport.watch_calls(), 1);
    }

    #[tokio::test]
    async fn test_unwatch_and_close_drop_watchers() {
        let transport = MemoryTransport::new();
        let session = authenticated(&transport, "u1").await;
        let request = watch_request("u1", "u2");
        let channel_id = request.channel_id.clone();

        let watch = session.watch(request.clone()).await.unwrap();
        assert_eq!(transport.watcher_count(&channel_id), 1);
        session
            .unwatch(&channel_id, watch.subscription)
            .await
            .unwrap();
        assert_eq!(transport.watcher_count(&channel_id), 0);

        let _watch = session.watch(request).await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(transport.watcher_count(&channel_id), 0);
    }

    #[tokio::test]
    async fn test_unwatch_keeps_other_subscriptions_to_same_channel() {
        let transport = MemoryTransport::new();
        let session = authenticated(&transport, "u1").await;
        let request = watch_request("u1", "u2");
        let channel_id = request.channel_id.clone();

        let older = session.watch(request.clone()).await.unwrap();
        let mut newer = session.watch(request).await.unwrap();
        assert_ne!(older.subscription, newer.subscription);
        assert_eq!(transport.watcher_count(&channel_id), 2);

        session
            .unwatch(&channel_id, older.subscription)
            .await
            .unwrap();
        assert_eq!(transport.watcher_count(&channel_id), 1);

        transport
            .post_message(&channel_id, &UserId::new("u2"), "still here")
            .unwrap();
        match newer.events.recv().await {
            Some(ChannelEvent::MessageNew(message)) => assert_eq!(message.text, "still here"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
