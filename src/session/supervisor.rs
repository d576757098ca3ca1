//! Connection supervisor.
//!
//! Owns the transport and at most one live [`Connection`]. Connect and
//! disconnect are serialized behind one async lock; concurrent
//! [`ConnectionSupervisor::ensure`] calls for the same identity and token
//! share a single connect attempt.
//!
//! # Flow
//!
//! ```text
//! ensure(identity, credential)
//!   ├─ live connection matches ───────────────► return it
//!   ├─ same attempt in flight ────────────────► wait for its outcome
//!   └─ lead the attempt
//!        ├─ release previous live connection
//!        ├─ open + authenticate (bounded)
//!        ├─ on failure: disconnect partial session
//!        └─ store as live, answer every waiter
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::credential::{AccessToken, Credential};
use crate::error::{Error, Result, duration_millis};
use crate::identifiers::{ConnectionId, UserId};
use crate::identity::Identity;
use crate::transport::{Transport, TransportSession};

// ============================================================================
// Types
// ============================================================================

/// Waiters of one in-flight connect attempt.
type Waiters = Vec<oneshot::Sender<Result<Connection>>>;

/// What a connection was opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectKey {
    user_id: UserId,
    token: AccessToken,
}

impl ConnectKey {
    fn new(identity: &Identity, credential: &Credential) -> Self {
        Self {
            user_id: identity.id.clone(),
            token: credential.token().clone(),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One authenticated transport session bound to one [`Identity`].
///
/// Cheap to clone; clones refer to the same session. Once released a
/// connection is never live again.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    identity: Identity,
    token: AccessToken,
    session: Box<dyn TransportSession>,
    released: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.identity.id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(identity: Identity, token: AccessToken, session: Box<dyn TransportSession>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                identity,
                token,
                session,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the identity the connection is authenticated as.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Returns `true` until the connection is released.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.inner.released.load(Ordering::SeqCst)
    }

    /// Returns the underlying transport session.
    #[inline]
    pub(crate) fn session(&self) -> &dyn TransportSession {
        self.inner.session.as_ref()
    }

    /// Fails with [`Error::ConnectionNotLive`] once released.
    pub(crate) fn require_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::ConnectionNotLive {
                connection_id: self.id(),
            })
        }
    }

    fn matches(&self, key: &ConnectKey) -> bool {
        self.inner.identity.id == key.user_id && self.inner.token == key.token
    }

    /// Marks the connection released. Returns `true` on the first call.
    fn mark_released(&self) -> bool {
        !self.inner.released.swap(true, Ordering::SeqCst)
    }
}

// ============================================================================
// ConnectionSupervisor
// ============================================================================

#[derive(Default)]
struct SupervisorState {
    live: Option<Connection>,
    inflight: FxHashMap<ConnectKey, Waiters>,
    closed: bool,
}

/// Owner of the transport and the live connection.
pub struct ConnectionSupervisor {
    /// Transport client owned by this supervisor.
    transport: Arc<dyn Transport>,
    /// Bound on open plus authenticate.
    connect_timeout: Duration,
    /// Serializes connect and disconnect.
    op_lock: AsyncMutex<()>,
    /// Live connection and in-flight attempts.
    state: Mutex<SupervisorState>,
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionSupervisor")
            .field("connect_timeout", &self.connect_timeout)
            .field("live", &state.live)
            .field("inflight", &state.inflight.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Creates a supervisor over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            op_lock: AsyncMutex::new(()),
            state: Mutex::new(SupervisorState::default()),
        }
    }

    /// Returns the live connection, if any.
    #[must_use]
    pub fn live(&self) -> Option<Connection> {
        self.state.lock().live.clone()
    }

    /// Returns a live connection for `identity` authenticated with
    /// `credential`, connecting if needed.
    ///
    /// A live connection for anything else is released first.
    ///
    /// # Errors
    ///
    /// - [`Error::CredentialMismatch`] if `credential` belongs to another user
    /// - [`Error::ConnectionTimeout`] if open plus authenticate exceed the bound
    /// - [`Error::AuthRejected`] if the backend refuses the token
    /// - [`Error::Disposed`] after [`ConnectionSupervisor::shutdown`]
    pub async fn ensure(&self, identity: &Identity, credential: &Credential) -> Result<Connection> {
        self.ensure_while(identity, credential, &|| true).await
    }

    /// Like [`ConnectionSupervisor::ensure`], but gives up with
    /// [`Error::Superseded`] if `wanted` turns false before this call gets
    /// to connect and nobody else waits on the attempt.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionSupervisor::ensure`], plus [`Error::Superseded`].
    pub async fn ensure_while(
        &self,
        identity: &Identity,
        credential: &Credential,
        wanted: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<Connection> {
        if credential.user_id() != &identity.id {
            return Err(Error::CredentialMismatch {
                expected: identity.id.clone(),
                actual: credential.user_id().clone(),
            });
        }

        let key = ConnectKey::new(identity, credential);

        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Disposed);
            }

            if let Some(live) = &state.live
                && live.is_live()
                && live.matches(&key)
            {
                return Ok(live.clone());
            }

            match state.inflight.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    state.inflight.insert(key.clone(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!(user_id = %identity.id, "Joining in-flight connect");
            return rx.await?;
        }

        let mut attempt = Attempt {
            supervisor: self,
            key: Some(key.clone()),
        };
        let result = self.connect(identity, &key, wanted).await;
        attempt.finish(&result);
        result
    }

    /// Releases `connection`. Idempotent; disconnect failures are logged.
    pub async fn release(&self, connection: &Connection) {
        if !connection.mark_released() {
            return;
        }

        let _op = self.op_lock.lock().await;
        self.disconnect_released(connection).await;
    }

    /// Releases the live connection, if any.
    pub async fn release_live(&self) {
        let live = self.live();
        if let Some(connection) = live {
            self.release(&connection).await;
        }
    }

    /// Waits for any in-flight connect, releases the live connection and
    /// refuses further `ensure` calls.
    pub async fn shutdown(&self) {
        let _op = self.op_lock.lock().await;

        let live = {
            let mut state = self.state.lock();
            state.closed = true;
            state.live.take()
        };

        if let Some(connection) = live
            && connection.mark_released()
        {
            self.disconnect_released(&connection).await;
        }

        debug!("Connection supervisor shut down");
    }

    /// Opens and authenticates under `op_lock`.
    async fn connect(
        &self,
        identity: &Identity,
        key: &ConnectKey,
        wanted: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<Connection> {
        let _op = self.op_lock.lock().await;

        let previous = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Disposed);
            }
            if !wanted() && state.inflight.get(key).is_some_and(Vec::is_empty) {
                state.inflight.remove(key);
                debug!(user_id = %key.user_id, "Connect attempt superseded");
                return Err(Error::Superseded);
            }
            state.live.take()
        };

        if let Some(previous) = previous {
            if previous.is_live() && previous.matches(key) {
                self.state.lock().live = Some(previous.clone());
                return Ok(previous);
            }
            if previous.mark_released() {
                debug!(
                    connection_id = %previous.id(),
                    user_id = %previous.identity().id,
                    "Releasing previous connection"
                );
                self.disconnect_released(&previous).await;
            }
        }

        let timeout_ms = duration_millis(self.connect_timeout);
        let deadline = Instant::now() + self.connect_timeout;

        let session = match timeout_at(deadline, self.transport.open()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::connection_timeout(timeout_ms)),
        };

        let authenticated = match timeout_at(deadline, session.authenticate(identity, &key.token))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::connection_timeout(timeout_ms)),
        };

        if let Err(e) = authenticated {
            self.discard(session.as_ref()).await;
            return Err(e);
        }

        let connection = Connection::new(identity.clone(), key.token.clone(), session);
        self.state.lock().live = Some(connection.clone());

        info!(
            connection_id = %connection.id(),
            user_id = %identity.id,
            "Connection established"
        );

        Ok(connection)
    }

    /// Disconnects a released connection. Caller holds `op_lock`.
    async fn disconnect_released(&self, connection: &Connection) {
        {
            let mut state = self.state.lock();
            if state
                .live
                .as_ref()
                .is_some_and(|live| live.id() == connection.id())
            {
                state.live = None;
            }
        }

        match timeout(self.connect_timeout, connection.session().disconnect()).await {
            Ok(Ok(())) => {
                debug!(connection_id = %connection.id(), "Connection released");
            }
            Ok(Err(e)) => {
                warn!(connection_id = %connection.id(), error = %e, "Disconnect failed");
            }
            Err(_) => {
                warn!(connection_id = %connection.id(), "Disconnect timed out");
            }
        }
    }

    /// Disconnects a session that never became a [`Connection`].
    async fn discard(&self, session: &dyn TransportSession) {
        match timeout(self.connect_timeout, session.disconnect()).await {
            Ok(Ok(())) => debug!("Partial session discarded"),
            Ok(Err(e)) => warn!(error = %e, "Failed to discard partial session"),
            Err(_) => warn!("Discarding partial session timed out"),
        }
    }
}

// ============================================================================
// Attempt
// ============================================================================

/// Leader side of an in-flight connect. Dropping it unanswered removes the
/// attempt, so its waiters observe [`Error::Cancelled`].
struct Attempt<'a> {
    supervisor: &'a ConnectionSupervisor,
    key: Option<ConnectKey>,
}

impl Attempt<'_> {
    /// Removes the attempt and answers every waiter with `result`.
    fn finish(&mut self, result: &Result<Connection>) {
        let Some(key) = self.key.take() else {
            return;
        };

        let waiters = self
            .supervisor
            .state
            .lock()
            .inflight
            .remove(&key)
            .unwrap_or_default();

        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "Answering coalesced connect");
        }
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.supervisor.state.lock().inflight.remove(&key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{MemoryTransport, OpenBehavior};

    fn supervisor(transport: &MemoryTransport) -> ConnectionSupervisor {
        ConnectionSupervisor::new(Arc::new(transport.clone()), Duration::from_millis(200))
    }

    fn credential(user: &str, token: &str) -> Credential {
        Credential::new(UserId::new(user), AccessToken::new(token), None)
    }

    #[tokio::test]
    async fn test_ensure_reuses_matching_connection() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);
        let ada = Identity::new("u1", "Ada");

        let first = supervisor.ensure(&ada, &credential("u1", "t1")).await.unwrap();
        let second = supervisor.ensure(&ada, &credential("u1", "t1")).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_identity_change_leaves_single_live_connection() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);

        let mut last = None;
        for n in 1..=5 {
            let user = format!("u{n}");
            let identity = Identity::new(user.as_str(), "User");
            let connection = supervisor
                .ensure(&identity, &credential(&user, "t"))
                .await
                .unwrap();
            assert_eq!(transport.live(), 1);
            last = Some(connection);
        }

        let last = last.unwrap();
        assert_eq!(transport.opened(), 5);
        assert_eq!(transport.peak_live(), 1);
        assert_eq!(last.identity().id.as_str(), "u5");
        assert!(last.is_live());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_coalesces() {
        let transport = MemoryTransport::new();
        transport.set_open_behavior(OpenBehavior::Delay(Duration::from_millis(30)));
        let supervisor = supervisor(&transport);
        let ada = Identity::new("u1", "Ada");
        let cred = credential("u1", "t1");

        let (a, b, c) = tokio::join!(
            supervisor.ensure(&ada, &cred),
            supervisor.ensure(&ada, &cred),
            supervisor.ensure(&ada, &cred),
        );

        let ids = [a.unwrap().id(), b.unwrap().id(), c.unwrap().id()];
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_coalesced_waiters_share_failure() {
        let transport = MemoryTransport::new();
        transport.set_open_behavior(OpenBehavior::Delay(Duration::from_millis(30)));
        transport.reject_user("u1");
        let supervisor = supervisor(&transport);
        let ada = Identity::new("u1", "Ada");
        let cred = credential("u1", "t1");

        let (a, b) = tokio::join!(supervisor.ensure(&ada, &cred), supervisor.ensure(&ada, &cred));

        assert!(matches!(a, Err(Error::AuthRejected { .. })));
        assert!(matches!(b, Err(Error::AuthRejected { .. })));
        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.live(), 0);
    }

    #[tokio::test]
    async fn test_open_timeout_is_typed() {
        let transport = MemoryTransport::new();
        transport.set_open_behavior(OpenBehavior::Stall);
        let supervisor = supervisor(&transport);

        let err = supervisor
            .ensure(&Identity::new("u1", "Ada"), &credential("u1", "t1"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }));
        assert_eq!(transport.live(), 0);
        assert!(supervisor.live().is_none());
    }

    #[tokio::test]
    async fn test_credential_for_other_user_is_refused() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);

        let err = supervisor
            .ensure(&Identity::new("u1", "Ada"), &credential("u2", "t"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CredentialMismatch { .. }));
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);
        let connection = supervisor
            .ensure(&Identity::new("u1", "Ada"), &credential("u1", "t"))
            .await
            .unwrap();

        supervisor.release(&connection).await;
        supervisor.release(&connection).await;

        assert!(!connection.is_live());
        assert!(supervisor.live().is_none());
        assert_eq!(transport.live(), 0);
        assert!(matches!(
            connection.require_live(),
            Err(Error::ConnectionNotLive { .. })
        ));
    }

    #[tokio::test]
    async fn test_new_token_replaces_connection() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);
        let ada = Identity::new("u1", "Ada");

        let old = supervisor.ensure(&ada, &credential("u1", "t1")).await.unwrap();
        let new = supervisor.ensure(&ada, &credential("u1", "t2")).await.unwrap();

        assert_ne!(old.id(), new.id());
        assert!(!old.is_live());
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test]
    async fn test_unwanted_attempt_never_opens() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);

        let err = supervisor
            .ensure_while(&Identity::new("u1", "Ada"), &credential("u1", "t"), &|| false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Superseded));
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_connections() {
        let transport = MemoryTransport::new();
        let supervisor = supervisor(&transport);
        let ada = Identity::new("u1", "Ada");
        supervisor.ensure(&ada, &credential("u1", "t")).await.unwrap();

        supervisor.shutdown().await;

        assert_eq!(transport.live(), 0);
        let err = supervisor.ensure(&ada, &credential("u1", "t")).await.unwrap_err();
        assert!(matches!(err, Error::Disposed));
    }
}
