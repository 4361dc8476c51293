//! Request multiplexing over a [`ReconnectingSocket`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, HyperliquidError, ReconnectError, WsRequestError};
use crate::transport::Transport;
use crate::ws::buffer::FifoMessageBuffer;
use crate::ws::config::WsConfig;
use crate::ws::messages::{
    ChannelMessage, PING, PostRequest, PostResponseData, RequestKind, SubscriptionAck,
    SubscriptionMethod, SubscriptionRequest, channels, extract_request_id, subscription_key,
};
use crate::ws::socket::{
    Connector, EventKind, ReconnectingSocket, SocketEvent, TungsteniteConnector,
};

/// Capacity of the channel-data broadcast.
const EVENT_CAPACITY: usize = 1024;

type Reply = Result<Value, WsRequestError>;

struct PendingEntry {
    tx: oneshot::Sender<Reply>,
    /// Set for subscription requests, which are acked by content not id.
    ack_key: Option<String>,
}

struct TransportInner {
    socket: ReconnectingSocket,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
    /// Acked subscriptions by canonical key.
    subscriptions: Mutex<BTreeMap<String, Value>>,
    events: broadcast::Sender<ChannelMessage>,
    config: WsConfig,
}

/// Hyperliquid WebSocket transport.
///
/// Multiplexes `post` requests and subscriptions over one
/// [`ReconnectingSocket`]:
///
/// - every request gets a fresh id and a pending entry before it is sent;
/// - the matching response resolves it, a correlated error rejects it;
/// - cancellation, the request timeout or socket termination end the wait;
/// - an involuntary disconnect rejects all in-flight requests with
///   [`WsRequestError::InvalidState`]. They are never resent.
///
/// Cloning yields another handle to the same connection. The socket is
/// closed when the last handle is dropped.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.inner.config.url)
            .field("socket", &self.inner.socket)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl WsTransport {
    /// Connect to `config.url` with `tokio-tungstenite`.
    pub fn connect(config: WsConfig) -> Result<Self, HyperliquidError> {
        let connector = TungsteniteConnector::new(config.url.clone())?;
        Ok(Self::with_connector(connector, config))
    }

    /// Connect through a custom [`Connector`].
    pub fn with_connector<C: Connector>(connector: C, config: WsConfig) -> Self {
        let buffer = Box::new(FifoMessageBuffer::new(config.reconnect.buffer_capacity));
        let socket = ReconnectingSocket::unstarted(config.reconnect.clone(), buffer);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let keep_alive = config.keep_alive;

        let inner = Arc::new(TransportInner {
            socket,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(BTreeMap::new()),
            events,
            config,
        });

        let weak = Arc::downgrade(&inner);
        inner.socket.on(EventKind::Message, move |event| {
            if let (Some(inner), SocketEvent::Message(text)) = (weak.upgrade(), event) {
                inner.handle_message(text);
            }
        });

        let weak = Arc::downgrade(&inner);
        inner.socket.on(EventKind::Close, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.reject_all(WsRequestError::InvalidState);
            }
        });

        let weak = Arc::downgrade(&inner);
        inner.socket.on(EventKind::Open, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.resubscribe();
            }
        });

        if let Some(period) = keep_alive {
            tokio::spawn(keep_alive_loop(
                Arc::downgrade(&inner),
                inner.socket.termination_token(),
                period,
            ));
        }

        inner.socket.start(Arc::new(connector));
        Self { inner }
    }

    /// Send a `post` request and wait for its response.
    ///
    /// `info` responses resolve with `payload.data` when present; `action`
    /// responses resolve with the whole payload unless its status is `err`.
    pub async fn request(
        &self,
        kind: RequestKind,
        payload: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, WsRequestError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&PostRequest::new(id, kind, &payload))
            .map_err(|e| WsRequestError::Serialize(e.to_string()))?;
        tracing::debug!(id, ?kind, "Sending post request");
        self.inner.roundtrip(id, None, text, cancel).await
    }

    /// Subscribe and wait for the server's acknowledgement.
    ///
    /// Once acknowledged, the subscription is restored after every reconnect
    /// (when `resubscribe` is enabled). Its data arrives on [`events`](Self::events).
    pub async fn subscribe(
        &self,
        subscription: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, WsRequestError> {
        let ack = self
            .subscription_roundtrip(SubscriptionMethod::Subscribe, &subscription, cancel)
            .await?;
        let key = subscription_key(SubscriptionMethod::Subscribe.as_str(), &subscription);
        self.inner.subscriptions.lock().insert(key, subscription);
        Ok(ack)
    }

    /// Unsubscribe and wait for the server's acknowledgement.
    pub async fn unsubscribe(
        &self,
        subscription: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, WsRequestError> {
        let ack = self
            .subscription_roundtrip(SubscriptionMethod::Unsubscribe, &subscription, cancel)
            .await?;
        let key = subscription_key(SubscriptionMethod::Subscribe.as_str(), &subscription);
        self.inner.subscriptions.lock().remove(&key);
        Ok(ack)
    }

    async fn subscription_roundtrip(
        &self,
        method: SubscriptionMethod,
        subscription: &Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, WsRequestError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&SubscriptionRequest {
            method,
            subscription,
        })
        .map_err(|e| WsRequestError::Serialize(e.to_string()))?;
        let ack_key = subscription_key(method.as_str(), subscription);
        tracing::debug!(method = method.as_str(), %subscription, "Sending subscription request");
        self.inner.roundtrip(id, Some(ack_key), text, cancel).await
    }

    /// Receive uncorrelated channel data (subscriptions, notifications,
    /// uncorrelated server errors).
    pub fn events(&self) -> broadcast::Receiver<ChannelMessage> {
        self.inner.events.subscribe()
    }

    /// Subscriptions that will be restored on reconnect.
    pub fn active_subscriptions(&self) -> Vec<Value> {
        self.inner.subscriptions.lock().values().cloned().collect()
    }

    /// Number of requests awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// The underlying socket.
    pub fn socket(&self) -> &ReconnectingSocket {
        &self.inner.socket
    }

    /// Close the connection permanently. Pending requests fail with
    /// [`WsRequestError::Terminated`].
    pub fn close(&self) {
        self.inner.socket.close();
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn request(
        &self,
        kind: RequestKind,
        payload: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, HyperliquidError> {
        Ok(WsTransport::request(self, kind, payload, cancel).await?)
    }
}

/// Removes the pending entry and cancels the request token on every exit
/// path, so a buffered copy of a settled request is never sent.
struct PendingGuard<'a> {
    inner: &'a TransportInner,
    id: u64,
    token: CancellationToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
        self.token.cancel();
    }
}

impl TransportInner {
    async fn roundtrip(
        &self,
        id: u64,
        ack_key: Option<String>,
        text: String,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, WsRequestError> {
        let token = match &cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        if token.is_cancelled() {
            return Err(WsRequestError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingEntry { tx, ack_key });
        let _guard = PendingGuard {
            inner: self,
            id,
            token: token.clone(),
        };

        self.socket.send(text, Some(token.clone()))?;

        tokio::select! {
            biased;
            reply = rx => reply.unwrap_or(Err(WsRequestError::InvalidState)),
            _ = token.cancelled() => {
                tracing::debug!(id, "Request cancelled");
                Err(WsRequestError::Cancelled)
            }
            _ = tokio::time::sleep(self.config.request_timeout) => {
                tracing::debug!(id, timeout = ?self.config.request_timeout, "Request timed out");
                Err(WsRequestError::Timeout)
            }
            _ = self.socket.terminated() => {
                let cause = self
                    .socket
                    .terminal_error()
                    .unwrap_or(ReconnectError::TerminatedByUser);
                Err(WsRequestError::Terminated(cause))
            }
        }
    }

    /// Resolve or reject request `id`. Returns `false` if it is not pending.
    fn settle(&self, id: u64, reply: Reply) -> bool {
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(reply);
                true
            }
            None => {
                tracing::debug!(id, "Dropping response for unknown request");
                false
            }
        }
    }

    fn reject_all(&self, error: WsRequestError) {
        let drained: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            tracing::warn!(
                count = drained.len(),
                "Rejecting in-flight requests after disconnect"
            );
        }
        for entry in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    fn resubscribe(&self) {
        if !self.config.resubscribe {
            return;
        }
        let subscriptions: Vec<Value> = self.subscriptions.lock().values().cloned().collect();
        if subscriptions.is_empty() {
            return;
        }

        tracing::debug!(count = subscriptions.len(), "Restoring subscriptions");
        for subscription in &subscriptions {
            let request = SubscriptionRequest {
                method: SubscriptionMethod::Subscribe,
                subscription,
            };
            match serde_json::to_string(&request) {
                Ok(text) => {
                    if let Err(e) = self.socket.send(text, None) {
                        tracing::warn!(error = %e, %subscription, "Failed to restore subscription");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize subscription"),
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let message: ChannelMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse WebSocket message");
                return;
            }
        };

        match message.channel.as_str() {
            channels::POST => self.handle_post(message.data),
            channels::SUBSCRIPTION_RESPONSE => self.handle_ack(message.data),
            channels::ERROR => self.handle_error(message),
            channels::PONG => tracing::trace!("Received pong"),
            _ => {
                let _ = self.events.send(message);
            }
        }
    }

    fn handle_post(&self, data: Value) {
        let data: PostResponseData = match serde_json::from_value(data) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed post response");
                return;
            }
        };
        let id = data.id;
        let payload = data.response.payload;

        let reply = match data.response.kind.as_str() {
            "error" => Err(WsRequestError::Api(ApiError::new(
                Some(id),
                text_of(&payload),
            ))),
            "action" if payload.get("status").and_then(Value::as_str) == Some("err") => {
                let message = payload
                    .get("response")
                    .map(text_of)
                    .unwrap_or_else(|| payload.to_string());
                Err(WsRequestError::Api(ApiError::new(Some(id), message)))
            }
            "info" => Ok(payload.get("data").cloned().unwrap_or(payload)),
            _ => Ok(payload),
        };
        self.settle(id, reply);
    }

    fn handle_ack(&self, data: Value) {
        let ack: SubscriptionAck = match serde_json::from_value(data.clone()) {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed subscription response");
                return;
            }
        };
        let key = subscription_key(&ack.method, &ack.subscription);

        let entry = {
            let mut pending = self.pending.lock();
            let oldest = pending
                .iter()
                .filter(|(_, entry)| entry.ack_key.as_deref() == Some(key.as_str()))
                .map(|(id, _)| *id)
                .min();
            oldest.and_then(|id| pending.remove(&id))
        };

        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Ok(data));
            }
            None => tracing::trace!(%key, "Unmatched subscription response"),
        }
    }

    fn handle_error(&self, message: ChannelMessage) {
        let text = text_of(&message.data);
        if let Some(id) = extract_request_id(&text) {
            if self.settle(id, Err(WsRequestError::Api(ApiError::new(Some(id), text.clone())))) {
                return;
            }
        }
        tracing::warn!(error = %text, "Uncorrelated error from server");
        let _ = self.events.send(message);
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        self.socket.close();
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ping while open. Stops at termination or when the transport is dropped.
async fn keep_alive_loop(
    inner: Weak<TransportInner>,
    terminated: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = terminated.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.socket.send_if_open(PING) {
            tracing::trace!("Sent keep-alive ping");
        }
    }
}
