//! Session controller.
//!
//! The controller is a handle to a driver task that owns all session
//! state. Input changes are sent to the driver as commands; every change
//! starts a new generation and spawns a transition:
//!
//! ```text
//! credential fetch → ensure connection → join channel
//! ```
//!
//! Transitions run concurrently with the driver but never touch state. The
//! driver applies their outcome only if its generation is still current;
//! a superseded outcome is discarded and the resources it acquired are
//! released unless the current inputs reuse them.
//!
//! # Example
//!
//! ```
//! use chat_session::credential::StaticTokenIssuer;
//! use chat_session::transport::MemoryTransport;
//! use chat_session::{Identity, SessionController, UserId};
//!
//! # async fn example() -> chat_session::Result<()> {
//! let controller = SessionController::builder()
//!     .issuer(StaticTokenIssuer::new())
//!     .transport(MemoryTransport::new())
//!     .build()?;
//!
//! controller.set_identity(Some(Identity::new("u1", "Ada")))?;
//! controller.set_target(Some(UserId::new("u2")))?;
//!
//! let state = controller.wait_for(|state| state.is_ready()).await?;
//! println!("{state}");
//!
//! controller.send_system_notice("hello").await?;
//! controller.dispose().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classify::{ErrorKind, classify};
use crate::credential::CredentialSource;
use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, Generation, MessageId, UserId};
use crate::identity::Identity;
use crate::notify::{Notification, Notifier};

use super::binder::{Channel, ChannelBinder};
use super::builder::SessionControllerBuilder;
use super::state::{ReadySession, SessionState};
use super::supervisor::{Connection, ConnectionSupervisor};

// ============================================================================
// Constants
// ============================================================================

/// Success notification after a call link was posted.
pub const CALL_LINK_SENT: &str = "Video call link sent successfully!";

// ============================================================================
// Commands
// ============================================================================

/// Change of controller inputs.
#[derive(Debug)]
enum InputChange {
    Identity(Option<Identity>),
    Target(Option<UserId>),
    InvalidateCredential,
    Refresh,
}

/// Commands for the driver task.
#[derive(Debug)]
enum ControllerCommand {
    Update(InputChange),
    Dispose { done: oneshot::Sender<()> },
}

// ============================================================================
// Pipeline
// ============================================================================

/// Components shared between the driver and its transitions.
struct Pipeline {
    credentials: CredentialSource,
    supervisor: ConnectionSupervisor,
    binder: ChannelBinder,
    /// Current generation.
    generation: AtomicU64,
}

/// How a transition ended.
enum Outcome {
    /// Connection authenticated and channel joined.
    Ready(ReadySession),
    /// Stopped early. `error` is `None` when superseded.
    Partial {
        connection: Option<Connection>,
        error: Option<Error>,
    },
}

/// Result of one transition, tagged with its generation.
struct TransitionOutcome {
    generation: Generation,
    outcome: Outcome,
}

impl Pipeline {
    fn current(&self) -> Generation {
        Generation::new(self.generation.load(Ordering::SeqCst))
    }

    fn advance(&self) -> Generation {
        Generation::new(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Runs credential fetch, connect and join for one generation.
    async fn transition(
        self: Arc<Self>,
        generation: Generation,
        identity: Identity,
        target: UserId,
    ) -> TransitionOutcome {
        let mut connection = None;
        let outcome = match self
            .steps(generation, &identity, &target, &mut connection)
            .await
        {
            Ok(Some(ready)) => Outcome::Ready(ready),
            Ok(None) => Outcome::Partial {
                connection,
                error: None,
            },
            Err(e) => Outcome::Partial {
                connection,
                error: Some(e),
            },
        };

        TransitionOutcome {
            generation,
            outcome,
        }
    }

    /// Returns `Ok(None)` as soon as `generation` is superseded.
    async fn steps(
        &self,
        generation: Generation,
        identity: &Identity,
        target: &UserId,
        connection: &mut Option<Connection>,
    ) -> Result<Option<ReadySession>> {
        let credential = self.credentials.fetch(identity).await?;
        if !self.is_current(generation) {
            debug!(%generation, "Superseded after credential fetch");
            return Ok(None);
        }

        let live = self
            .supervisor
            .ensure_while(identity, &credential, &|| self.is_current(generation))
            .await?;
        *connection = Some(live.clone());
        if !self.is_current(generation) {
            debug!(%generation, "Superseded after connect");
            return Ok(None);
        }

        let channel = self.binder.join(&live, target).await?;
        Ok(Some(ReadySession {
            connection: live,
            channel,
        }))
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Task owning the session state.
struct Driver {
    pipeline: Arc<Pipeline>,
    notifier: Arc<dyn Notifier>,
    state_tx: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<ControllerCommand>,
    transitions: JoinSet<TransitionOutcome>,
    identity: Option<Identity>,
    target: Option<UserId>,
    disposing: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(ControllerCommand::Update(change)) => self.update(change).await,
                        Some(ControllerCommand::Dispose { done }) => {
                            self.dispose().await;
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            debug!("Controller handle dropped");
                            self.dispose().await;
                            break;
                        }
                    }
                }

                Some(joined) = self.transitions.join_next(), if !self.transitions.is_empty() => {
                    match joined {
                        Ok(outcome) => self.apply(outcome).await,
                        Err(e) => {
                            error!(error = %e, "Transition task failed");
                            if self.transitions.is_empty() && self.state_tx.borrow().is_connecting() {
                                self.fail(ErrorKind::Unknown);
                            }
                        }
                    }
                }
            }
        }

        debug!("Controller driver terminated");
    }

    async fn update(&mut self, change: InputChange) {
        let identity_changed = match change {
            InputChange::Identity(identity) => {
                if self.identity == identity {
                    return;
                }
                let changed = self.identity.as_ref().map(|i| &i.id) != identity.as_ref().map(|i| &i.id);
                self.identity = identity;
                changed
            }
            InputChange::Target(target) => {
                if self.target == target {
                    return;
                }
                self.target = target;
                false
            }
            InputChange::InvalidateCredential => {
                if let Some(identity) = &self.identity {
                    self.pipeline.credentials.invalidate(&identity.id);
                }
                false
            }
            InputChange::Refresh => false,
        };

        self.restart(identity_changed).await;
    }

    /// Supersedes in-flight work and starts a transition for the current
    /// inputs.
    async fn restart(&mut self, identity_changed: bool) {
        let generation = self.pipeline.advance();

        let previous = self.state_tx.borrow().clone();
        if let SessionState::Ready(ready) = previous {
            ready.channel.close().await;
            if identity_changed {
                self.pipeline.supervisor.release(&ready.connection).await;
            }
        }

        match (&self.identity, &self.target) {
            (Some(identity), Some(target)) => {
                info!(
                    %generation,
                    user_id = %identity.id,
                    target = %target,
                    "Session transition started"
                );
                self.publish(SessionState::Connecting);
                self.transitions.spawn(Arc::clone(&self.pipeline).transition(
                    generation,
                    identity.clone(),
                    target.clone(),
                ));
            }
            (identity, _) => {
                if identity.is_none() {
                    self.pipeline.supervisor.release_live().await;
                }
                debug!(%generation, "Inputs incomplete");
                self.publish(SessionState::Idle);
            }
        }
    }

    async fn apply(&mut self, transition: TransitionOutcome) {
        if self.disposing || !self.pipeline.is_current(transition.generation) {
            debug!(generation = %transition.generation, "Discarding superseded outcome");
            self.discard(transition.outcome).await;
            return;
        }

        match transition.outcome {
            Outcome::Ready(ready) => {
                info!(
                    generation = %transition.generation,
                    connection_id = %ready.connection.id(),
                    channel_id = %ready.channel.id(),
                    "Session ready"
                );
                self.publish(SessionState::Ready(ready));
            }
            Outcome::Partial { connection, error } => {
                if let Some(connection) = connection {
                    self.pipeline.supervisor.release(&connection).await;
                }
                self.pipeline.supervisor.release_live().await;

                let kind = match &error {
                    Some(e) => {
                        warn!(generation = %transition.generation, error = %e, "Session transition failed");
                        classify(e)
                    }
                    None => ErrorKind::Unknown,
                };
                self.fail(kind);
            }
        }
    }

    /// Releases what a superseded transition acquired.
    async fn discard(&self, outcome: Outcome) {
        let connection = match outcome {
            Outcome::Ready(ready) => {
                ready.channel.close().await;
                Some(ready.connection)
            }
            Outcome::Partial { connection, error } => {
                if let Some(e) = error {
                    debug!(error = %e, "Superseded transition failed");
                }
                connection
            }
        };

        if let Some(connection) = connection
            && !self.reuses(&connection)
        {
            self.pipeline.supervisor.release(&connection).await;
        }
    }

    /// Returns `true` if the current transition or ready session may use
    /// `connection`.
    fn reuses(&self, connection: &Connection) -> bool {
        if self.disposing {
            return false;
        }
        let active = matches!(
            *self.state_tx.borrow(),
            SessionState::Connecting | SessionState::Ready(_)
        );
        active
            && self
                .identity
                .as_ref()
                .is_some_and(|identity| identity.id == connection.identity().id)
    }

    async fn dispose(&mut self) {
        self.disposing = true;
        let generation = self.pipeline.advance();
        info!(%generation, "Disposing session controller");

        let previous = self.state_tx.borrow().clone();
        if let SessionState::Ready(ready) = previous {
            ready.channel.close().await;
            self.pipeline.supervisor.release(&ready.connection).await;
        }

        while let Some(joined) = self.transitions.join_next().await {
            match joined {
                Ok(transition) => self.discard(transition.outcome).await,
                Err(e) => error!(error = %e, "Transition task failed"),
            }
        }

        self.pipeline.supervisor.shutdown().await;
        self.pipeline.credentials.clear();
        self.identity = None;
        self.target = None;
        self.publish(SessionState::Idle);
    }

    fn fail(&self, kind: ErrorKind) {
        self.publish(SessionState::Failed(kind));
        self.notifier.notify(kind.notification());
    }

    fn publish(&self, state: SessionState) {
        debug!(state = %state, "Session state");
        self.state_tx.send_replace(state);
    }
}

// ============================================================================
// SessionController
// ============================================================================

/// Handle to a session lifecycle.
///
/// Dropping the handle disposes the session in the background; call
/// [`SessionController::dispose`] to wait for it.
pub struct SessionController {
    commands: mpsc::UnboundedSender<ControllerCommand>,
    state: watch::Receiver<SessionState>,
    notifier: Arc<dyn Notifier>,
    disposed: AtomicBool,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &*self.state.borrow())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionControllerBuilder {
        SessionControllerBuilder::new()
    }

    /// Spawns the driver task. Must run inside a tokio runtime.
    pub(crate) fn spawn(
        credentials: CredentialSource,
        supervisor: ConnectionSupervisor,
        binder: ChannelBinder,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Idle);

        let driver = Driver {
            pipeline: Arc::new(Pipeline {
                credentials,
                supervisor,
                binder,
                generation: AtomicU64::new(0),
            }),
            notifier: Arc::clone(&notifier),
            state_tx,
            commands: command_rx,
            transitions: JoinSet::new(),
            identity: None,
            target: None,
            disposing: false,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            state,
            notifier,
            disposed: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Sets or clears the authenticated identity.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal.
    pub fn set_identity(&self, identity: Option<Identity>) -> Result<()> {
        self.send(InputChange::Identity(identity))
    }

    /// Sets or clears the conversation target.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal.
    pub fn set_target(&self, target: Option<UserId>) -> Result<()> {
        self.send(InputChange::Target(target))
    }

    /// Drops the cached credential and reconnects with a new one.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal.
    pub fn invalidate_credential(&self) -> Result<()> {
        self.send(InputChange::InvalidateCredential)
    }

    /// Re-runs the transition for the current inputs. A stale credential is
    /// replaced; a fresh one is reused.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal.
    pub fn refresh(&self) -> Result<()> {
        self.send(InputChange::Refresh)
    }

    fn send(&self, change: InputChange) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        self.commands
            .send(ControllerCommand::Update(change))
            .map_err(|_| Error::Disposed)
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] if the driver stops first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| Error::Disposed)?;
        Ok(state.clone())
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Posts `text` to the bound channel.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] unless the session is ready
    /// - [`Error::Disposed`] after disposal
    pub async fn send_system_notice(&self, text: &str) -> Result<MessageId> {
        let channel = self.ready_channel()?;
        channel.send_message(text).await
    }

    /// Posts a video call link for the bound channel and notifies success.
    ///
    /// The link is `{origin}/call/{channel id}`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] unless the session is ready
    /// - [`Error::Disposed`] after disposal
    pub async fn announce_call(&self, origin: &str) -> Result<MessageId> {
        let channel = self.ready_channel()?;
        let text = format!(
            "I've started a video call. Join me here: {}",
            call_link(origin, channel.id())
        );

        match channel.send_message(&text).await {
            Ok(id) => {
                self.notifier.notify(Notification::success(CALL_LINK_SENT));
                Ok(id)
            }
            Err(e) => {
                self.notifier.notify(classify(&e).notification());
                Err(e)
            }
        }
    }

    fn ready_channel(&self) -> Result<Channel> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        self.state
            .borrow()
            .ready()
            .map(|ready| ready.channel.clone())
            .ok_or(Error::NotReady)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tears the session down and waits until it is `Idle` with no live
    /// connection. In-flight transitions settle first; their results are
    /// released, never applied.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);

        let (done, rx) = oneshot::channel();
        if self
            .commands
            .send(ControllerCommand::Dispose { done })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Builds the call link for `channel_id`.
fn call_link(origin: &str, channel_id: &ChannelId) -> String {
    format!(
        "{}/call/{}",
        origin.trim_end_matches('/'),
        urlencoding::encode(channel_id.as_str())
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::credential::{IssueBehavior, StaticTokenIssuer};
    use crate::notify::{RecordingNotifier, Severity};
    use crate::session::SessionOptions;
    use crate::transport::{ChannelEvent, JoinBehavior, MemoryTransport, OpenBehavior};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        controller: SessionController,
        transport: MemoryTransport,
        issuer: Arc<StaticTokenIssuer>,
        notifier: RecordingNotifier,
    }

    fn harness_with(options: SessionOptions) -> Harness {
        let transport = MemoryTransport::new();
        let issuer = Arc::new(StaticTokenIssuer::new());
        let notifier = RecordingNotifier::new();

        let controller = SessionController::builder()
            .shared_issuer(issuer.clone())
            .transport(transport.clone())
            .notifier(notifier.clone())
            .options(options)
            .build()
            .unwrap();

        Harness {
            controller,
            transport,
            issuer,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(
            SessionOptions::new()
                .with_connect_timeout(Duration::from_millis(500))
                .with_join_timeout(Duration::from_millis(200)),
        )
    }

    fn channel(a: &str, b: &str) -> ChannelId {
        ChannelId::derive(&UserId::new(a), &UserId::new(b))
    }

    async fn ready_on(controller: &SessionController, channel_id: &str) -> SessionState {
        timeout(
            WAIT,
            controller.wait_for(|state| {
                state
                    .ready()
                    .is_some_and(|ready| ready.channel.id().as_str() == channel_id)
            }),
        )
        .await
        .unwrap()
        .unwrap()
    }

    async fn failed(controller: &SessionController) -> ErrorKind {
        let state = timeout(WAIT, controller.wait_for(|state| state.failure().is_some()))
            .await
            .unwrap()
            .unwrap();
        state.failure().unwrap()
    }

    #[test]
    fn test_call_link_encodes_channel() {
        let link = call_link("https://chat.example.com/", &ChannelId::from_raw("a b-c"));
        assert_eq!(link, "https://chat.example.com/call/a%20b-c");
    }

    #[tokio::test]
    async fn test_incomplete_inputs_stay_idle() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.refresh().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.controller.state().is_idle());
        assert_eq!(h.transport.opened(), 0);
        assert!(matches!(
            h.controller.send_system_notice("hi").await,
            Err(Error::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_reaches_ready_and_sends_notice() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u2", "Bob")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u1"))).unwrap();

        let state = ready_on(&h.controller, "u1-u2").await;
        let ready = state.ready().unwrap();
        assert_eq!(ready.connection.identity().id.as_str(), "u2");
        assert!(ready.channel.is_open());

        h.controller.send_system_notice("hello").await.unwrap();
        let messages = h.transport.messages(&channel("u1", "u2"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");

        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_credential_auth_error_never_connects() {
        let h = harness();
        h.issuer.set_behavior("u1", IssueBehavior::Reject);

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();

        assert_eq!(failed(&h.controller).await, ErrorKind::Auth);
        assert_eq!(h.transport.opened(), 0);

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].severity, Severity::Error);
        assert_eq!(notifications[0].message, ErrorKind::Auth.message());
    }

    #[tokio::test]
    async fn test_join_timeout_releases_connection() {
        let h = harness();
        h.transport
            .set_join_behavior(channel("u1", "u2"), JoinBehavior::Stall);

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();

        assert_eq!(failed(&h.controller).await, ErrorKind::Timeout);
        assert_eq!(h.transport.opened(), 1);
        assert_eq!(h.transport.live(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_network_error() {
        let h = harness();
        h.transport.set_open_behavior(OpenBehavior::Fail);

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();

        assert_eq!(failed(&h.controller).await, ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_rejected_join_is_channel_error() {
        let h = harness();
        h.transport
            .set_join_behavior(channel("u1", "u2"), JoinBehavior::Reject);

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();

        assert_eq!(failed(&h.controller).await, ErrorKind::Channel);
        assert_eq!(h.transport.live(), 0);
    }

    #[tokio::test]
    async fn test_rapid_target_change_binds_latest_only() {
        let h = harness();
        let gate = h.transport.gate_join(channel("u1", "u2"));

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();

        // Wait until the u2 join is parked on the gate.
        timeout(WAIT, async {
            while h.transport.authenticated() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        h.controller.set_target(Some(UserId::new("u3"))).unwrap();
        ready_on(&h.controller, "u1-u3").await;

        gate.open();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = h.controller.state();
        assert_eq!(state.ready().unwrap().channel.id().as_str(), "u1-u3");
        assert_eq!(h.transport.watcher_count(&channel("u1", "u2")), 0);
        assert_eq!(h.transport.watcher_count(&channel("u1", "u3")), 1);
        assert_eq!(h.transport.opened(), 1);
        assert_eq!(h.transport.live(), 1);

        h.controller.dispose().await;
        assert_eq!(h.transport.live(), 0);
    }

    #[tokio::test]
    async fn test_returning_to_pending_channel_keeps_its_events() {
        let h = harness();
        let gate = h.transport.gate_join(channel("u1", "u2"));

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        timeout(WAIT, async {
            while h.transport.authenticated() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        h.controller.set_target(Some(UserId::new("u3"))).unwrap();
        ready_on(&h.controller, "u1-u3").await;

        // Back to u2 while the first u2 join is still held.
        h.transport
            .set_join_behavior(channel("u1", "u2"), JoinBehavior::Immediate);
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        let state = ready_on(&h.controller, "u1-u2").await;
        let current = state.ready().unwrap().channel.clone();
        let mut events = current.take_events().unwrap();

        gate.open();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.controller.state().is_ready());
        assert!(current.is_open());
        assert_eq!(h.transport.watcher_count(&channel("u1", "u2")), 1);

        h.transport
            .post_message(&channel("u1", "u2"), &UserId::new("u2"), "still listening")
            .unwrap();
        match timeout(WAIT, events.recv()).await.unwrap() {
            Some(ChannelEvent::MessageNew(message)) => {
                assert_eq!(message.text, "still listening");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(h.transport.opened(), 1);
        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_superseded_join_failure_leaves_ready_untouched() {
        let h = harness();
        h.transport
            .set_join_behavior(channel("u1", "u2"), JoinBehavior::Stall);

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        timeout(WAIT, async {
            while h.transport.authenticated() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        h.controller.set_target(Some(UserId::new("u3"))).unwrap();
        let state = ready_on(&h.controller, "u1-u3").await;
        let connection = state.ready().unwrap().connection.clone();

        // The stalled u2 join times out after the u3 session is ready.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let state = h.controller.state();
        let ready = state.ready().unwrap();
        assert_eq!(ready.channel.id().as_str(), "u1-u3");
        assert!(ready.channel.is_open());
        assert_eq!(ready.connection.id(), connection.id());
        assert!(connection.is_live());
        assert_eq!(h.transport.live(), 1);
        assert_eq!(h.transport.watcher_count(&channel("u1", "u2")), 0);
        assert!(
            h.notifier
                .notifications()
                .iter()
                .all(|n| n.severity != Severity::Error)
        );

        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_identity_changes_keep_single_connection() {
        let h = harness();
        h.controller.set_target(Some(UserId::new("peer"))).unwrap();

        for n in 1..=4 {
            let user = format!("u{n}");
            h.controller
                .set_identity(Some(Identity::new(user.as_str(), "User")))
                .unwrap();
        }

        ready_on(&h.controller, "peer-u4").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.transport.live(), 1);
        assert_eq!(h.transport.peak_live(), 1);
        let state = h.controller.state();
        assert_eq!(
            state.ready().unwrap().connection.identity().id.as_str(),
            "u4"
        );

        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_identity_revoked_releases_connection() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        ready_on(&h.controller, "u1-u2").await;

        h.controller.set_identity(None).unwrap();
        timeout(WAIT, h.controller.wait_for(SessionState::is_idle))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.transport.live(), 0);
    }

    #[tokio::test]
    async fn test_dispose_while_connecting_settles_idle() {
        let h = harness();
        h.transport
            .set_open_behavior(OpenBehavior::Delay(Duration::from_millis(100)));

        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        timeout(WAIT, h.controller.wait_for(SessionState::is_connecting))
            .await
            .unwrap()
            .unwrap();

        h.controller.dispose().await;

        assert!(h.controller.state().is_idle());
        assert_eq!(h.transport.live(), 0);
        assert!(matches!(
            h.controller.set_target(Some(UserId::new("u3"))),
            Err(Error::Disposed)
        ));
        assert!(matches!(
            h.controller.send_system_notice("late").await,
            Err(Error::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_invalidate_credential_fetches_new_token() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        let first = ready_on(&h.controller, "u1-u2").await;
        let first_id = first.ready().unwrap().connection.id();

        h.controller.invalidate_credential().unwrap();
        let second = timeout(
            WAIT,
            h.controller.wait_for(|state| {
                state
                    .ready()
                    .is_some_and(|ready| ready.connection.id() != first_id)
            }),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(h.issuer.calls(), 2);
        assert!(!first.ready().unwrap().connection.is_live());
        assert!(second.ready().unwrap().connection.is_live());
        assert_eq!(h.transport.live(), 1);

        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_refresh_reuses_fresh_credential() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        let first = ready_on(&h.controller, "u1-u2").await;
        let first_channel = first.ready().unwrap().channel.clone();

        h.controller.refresh().unwrap();
        timeout(
            WAIT,
            h.controller.wait_for(|state| {
                state
                    .ready()
                    .is_some_and(|ready| ready.channel.is_open() && !first_channel.is_open())
            }),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(h.issuer.calls(), 1);
        assert_eq!(h.transport.opened(), 1);

        h.controller.dispose().await;
    }

    #[tokio::test]
    async fn test_announce_call_posts_link_and_notifies() {
        let h = harness();
        h.controller
            .set_identity(Some(Identity::new("u1", "Ada")))
            .unwrap();
        h.controller.set_target(Some(UserId::new("u2"))).unwrap();
        ready_on(&h.controller, "u1-u2").await;

        h.controller
            .announce_call("https://chat.example.com")
            .await
            .unwrap();

        let messages = h.transport.messages(&channel("u1", "u2"));
        assert_eq!(
            messages[0].text,
            "I've started a video call. Join me here: https://chat.example.com/call/u1-u2"
        );
        let notifications = h.notifier.notifications();
        assert_eq!(notifications.last().unwrap().message, CALL_LINK_SENT);
        assert_eq!(notifications.last().unwrap().severity, Severity::Success);

        h.controller.dispose().await;
    }
}
