//! WebSocket adapter and event loop.
//!
//! [`WsTransport`] dials the backend; every [`WsSession`] spawns a tokio
//! task that handles:
//!
//! - Outgoing requests and request/response correlation by UUID
//! - Incoming channel events, routed to per-channel subscribers
//! - Failing pending requests when the socket goes away
//!
//! A watch registers its subscriber before the `channel.watch` request is
//! written, so events the backend pushes ahead of the response are still
//! delivered after the snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::credential::AccessToken;
use crate::error::{Error, Result, duration_millis};
use crate::identifiers::{ChannelId, MessageId, RequestId, SubscriptionId};
use crate::identity::Identity;
use crate::protocol::{
    ChannelCommand, Command, ConnectionCommand, Event, MessageCommand, Request, Response,
};

use super::contract::{
    ChannelEvent, ChannelSnapshot, Transport, TransportSession, Watch, WatchRequest,
};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

/// Environment variable holding the backend WebSocket URL.
pub const WS_URL_ENV: &str = "CHAT_WS_URL";

/// Environment variable holding the application API key.
pub const API_KEY_ENV: &str = "CHAT_API_KEY";

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

/// Map of watched channels to their event sinks.
type SubscriberMap = FxHashMap<ChannelId, Subscription>;

/// One watched channel and every local sink on it.
///
/// The backend sees a single watch per channel; `channel.unwatch` goes out
/// only when the last sink is removed.
struct Subscription {
    /// Channel type, needed again for `channel.unwatch`.
    kind: String,
    /// Event sinks, one per [`Watch`].
    sinks: Vec<(SubscriptionId, mpsc::UnboundedSender<ChannelEvent>)>,
}

/// Sink registered by an unfinished `watch`.
///
/// Removed on drop unless [`PendingWatch::complete`] ran, so a cancelled or
/// failed watch leaves nothing behind.
struct PendingWatch<'a> {
    session: &'a WsSession,
    channel_id: ChannelId,
    subscription: SubscriptionId,
    /// Whether the backend may hold the watch. Cleared on an explicit
    /// refusal.
    requested: bool,
    done: bool,
}

impl PendingWatch<'_> {
    /// Keeps the sink.
    fn complete(mut self) -> SubscriptionId {
        self.done = true;
        self.subscription
    }
}

impl Drop for PendingWatch<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let last = self
            .session
            .remove_sink(&self.channel_id, self.subscription);
        if let Some(kind) = last
            && self.requested
        {
            debug!(channel_id = %self.channel_id, "Watch abandoned, unwatching");
            self.session
                .send_detached(Command::Channel(ChannelCommand::Unwatch {
                    kind,
                    id: self.channel_id.clone(),
                }));
        }
    }
}

/// Internal commands for the event loop.
enum LoopCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// WsTransport
// ============================================================================

/// [`Transport`] that dials a WebSocket backend.
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// Backend URL.
    url: Url,
    /// Application API key, sent as `api_key` query parameter.
    api_key: Option<String>,
    /// Per-request timeout.
    request_timeout: Duration,
}

impl WsTransport {
    /// Creates a transport for `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the URL is invalid or not a WebSocket URL.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config(format!("Invalid WebSocket URL {url}: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Creates a transport from [`WS_URL_ENV`] and, if set, [`API_KEY_ENV`].
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if [`WS_URL_ENV`] is unset or invalid.
    pub fn from_env() -> Result<Self> {
        let url =
            env::var(WS_URL_ENV).map_err(|_| Error::config(format!("{WS_URL_ENV} is not set")))?;

        let transport = Self::new(&url)?;
        Ok(match env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => transport.with_api_key(key),
            _ => transport,
        })
    }

    /// Sets the application API key.
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the URL dialed by [`Transport::open`].
    #[must_use]
    pub fn connect_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(api_key) = &self.api_key {
            url.query_pairs_mut().append_pair("api_key", api_key);
        }
        url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<Box<dyn TransportSession>> {
        let url = self.connect_url();
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        debug!(host = ?self.url.host_str(), "WebSocket connection established");

        Ok(Box::new(WsSession::new(ws_stream, self.request_timeout)))
    }
}

// ============================================================================
// WsSession
// ============================================================================

/// One WebSocket session.
///
/// Dropping the session closes the socket.
pub struct WsSession {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Channel subscribers (shared with event loop).
    subscribers: Arc<Mutex<SubscriberMap>>,
    /// Per-request timeout.
    request_timeout: Duration,
    /// Set once `disconnect` ran.
    disconnected: AtomicBool,
}

impl WsSession {
    /// Wraps an established WebSocket and spawns its event loop.
    pub fn new<S>(ws_stream: WebSocketStream<S>, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let subscribers = Arc::new(Mutex::new(SubscriberMap::default()));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            Arc::clone(&subscribers),
        ));

        Self {
            command_tx,
            correlation,
            subscribers,
            request_timeout,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns the number of local sinks on `channel_id`.
    #[must_use]
    pub fn sink_count(&self, channel_id: &ChannelId) -> usize {
        self.subscribers
            .lock()
            .get(channel_id)
            .map_or(0, |subscription| subscription.sinks.len())
    }

    /// Sends a command and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the socket is gone
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Protocol`] if too many requests are pending
    async fn request(&self, command: Command) -> Result<Response> {
        let request = Request::new(command);
        let request_id = request.id;

        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(LoopCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(LoopCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    duration_millis(self.request_timeout),
                ))
            }
        }
    }

    /// Sends a command without waiting for its response.
    fn send_detached(&self, command: Command) {
        let (response_tx, _) = oneshot::channel();
        let _ = self.command_tx.send(LoopCommand::Send {
            request: Request::new(command),
            response_tx,
        });
    }

    /// Removes one sink. Returns the channel kind if it was the last one.
    fn remove_sink(&self, channel_id: &ChannelId, subscription: SubscriptionId) -> Option<String> {
        let mut subscribers = self.subscribers.lock();
        let entry = subscribers.get_mut(channel_id)?;

        let before = entry.sinks.len();
        entry.sinks.retain(|(id, _)| *id != subscription);
        if entry.sinks.len() == before || !entry.sinks.is_empty() {
            return None;
        }

        subscribers.remove(channel_id).map(|entry| entry.kind)
    }

    /// Stops the event loop.
    fn shutdown(&self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        subscribers: Arc<Mutex<SubscriberMap>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &subscribers);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { request, response_tx }) => {
                            let request_id = request.id;
                            let json = match to_string(&request) {
                                Ok(json) => json,
                                Err(e) => {
                                    let _ = response_tx.send(Err(e.into()));
                                    continue;
                                }
                            };

                            correlation.lock().insert(request_id, response_tx);

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await
                                && let Some(tx) = correlation.lock().remove(&request_id)
                            {
                                let _ = tx.send(Err(Error::connection(e.to_string())));
                            }

                            trace!(%request_id, "Request sent");
                        }

                        Some(LoopCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let pending: Vec<_> = correlation.lock().drain().collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failed pending requests on shutdown");
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        // Dropping the senders ends every subscriber stream.
        subscribers.lock().clear();

        debug!("Event loop terminated");
    }

    /// Handles an incoming text message from the backend.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        subscribers: &Arc<Mutex<SubscriberMap>>,
    ) {
        if let Ok(response) = from_str::<Response>(text) {
            let tx = correlation.lock().remove(&response.id);

            if let Some(tx) = tx {
                let _ = tx.send(Ok(response));
            } else {
                warn!(id = %response.id, "Response for unknown request");
            }
            return;
        }

        if let Ok(event) = from_str::<Event>(text) {
            let Some(channel_id) = event.channel_id() else {
                warn!(method = %event.method, "Event without channelId");
                return;
            };

            let mut subscribers = subscribers.lock();
            let Some(subscription) = subscribers.get_mut(&channel_id) else {
                trace!(%channel_id, "Event for unwatched channel");
                return;
            };

            let parsed = event.parse();
            subscription
                .sinks
                .retain(|(_, tx)| tx.send(parsed.clone()).is_ok());
            trace!(
                %channel_id,
                method = %event.method,
                sinks = subscription.sinks.len(),
                "Event routed"
            );

            if subscription.sinks.is_empty() {
                subscribers.remove(&channel_id);
                debug!(%channel_id, "Subscribers gone, dropped subscription");
            }
            return;
        }

        warn!(text = %text, "Failed to parse incoming message");
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl TransportSession for WsSession {
    async fn authenticate(&self, user: &Identity, token: &AccessToken) -> Result<()> {
        let command = Command::Connection(ConnectionCommand::Authenticate {
            user: user.clone(),
            token: token.expose().to_string(),
        });

        self.request(command).await?.into_result()?;
        debug!(user_id = %user.id, "WebSocket session authenticated");
        Ok(())
    }

    async fn watch(&self, request: WatchRequest) -> Result<Watch> {
        let (tx, events) = mpsc::unbounded_channel();
        let subscription = SubscriptionId::next();
        let channel_id = request.channel_id.clone();

        // Registered before the request so no event slips past the snapshot.
        self.subscribers
            .lock()
            .entry(channel_id.clone())
            .or_insert_with(|| Subscription {
                kind: request.kind.clone(),
                sinks: Vec::new(),
            })
            .sinks
            .push((subscription, tx));

        let mut pending = PendingWatch {
            session: self,
            channel_id: channel_id.clone(),
            subscription,
            requested: true,
            done: false,
        };

        let command = Command::Channel(ChannelCommand::Watch {
            kind: request.kind,
            id: request.channel_id,
            members: request.members,
        });

        let response = self.request(command).await?;
        let value = match response.into_channel_result(&channel_id) {
            Ok(value) => value,
            Err(e) => {
                pending.requested = false;
                return Err(e);
            }
        };

        let snapshot = if value.is_null() {
            ChannelSnapshot::default()
        } else {
            serde_json::from_value(value)?
        };

        Ok(Watch {
            subscription: pending.complete(),
            snapshot,
            events,
        })
    }

    async fn unwatch(&self, channel_id: &ChannelId, subscription: SubscriptionId) -> Result<()> {
        let Some(kind) = self.remove_sink(channel_id, subscription) else {
            return Ok(());
        };

        let command = Command::Channel(ChannelCommand::Unwatch {
            kind,
            id: channel_id.clone(),
        });
        self.request(command).await?.into_channel_result(channel_id)?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId> {
        let command = Command::Message(MessageCommand::Send {
            channel_id: channel_id.clone(),
            text: text.to_string(),
        });

        let value = self
            .request(command)
            .await?
            .into_channel_result(channel_id)?;

        value
            .get("messageId")
            .and_then(Value::as_str)
            .map(MessageId::new)
            .ok_or_else(|| Error::protocol("Expected messageId in message.send response"))
    }

    async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self
            .request(Command::Connection(ConnectionCommand::Disconnect))
            .await
            .and_then(Response::into_result);
        self.shutdown();
        result.map(|_| ())
    }
}

// ============================================================================
// Tests
// ============================================================================
