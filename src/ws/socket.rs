//! Self-healing WebSocket connection.
//!
//! [`ReconnectingSocket`] owns at most one physical connection at a time. A
//! background task drives it through
//!
//! ```text
//! Connecting -> Open -> (Closed -> Connecting)* -> (Open | Terminated)
//! ```
//!
//! Messages sent while the socket is not open go to a [`MessageBuffer`] and
//! are flushed in order on the next open. Listeners are owned by the socket
//! rather than the physical connection, so they keep firing across
//! reconnects. `Terminated` is final: the buffer is cleared, listeners are
//! detached and every later send fails immediately.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{HyperliquidError, ReconnectError, SendError};
use crate::ws::buffer::{FifoMessageBuffer, MessageBuffer};
use crate::ws::config::ReconnectConfig;

/// Close code when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code when the peer sent a close frame without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code used when a connection attempt timed out.
pub const CLOSE_TIMEOUT: u16 = 3008;

/// Why a physical connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
}

impl CloseEvent {
    /// Create a close event.
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Connection lost without a closing handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }

    /// Connection attempt exceeded the connect timeout.
    pub fn timeout() -> Self {
        Self::new(CLOSE_TIMEOUT, "Timeout", false)
    }
}

/// An inbound frame of a physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text (or UTF-8 binary) message.
    Text(String),
    /// The peer closed the connection.
    Close(CloseEvent),
}

/// Outbound half of a physical connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = HyperliquidError> + Send>>;
/// Inbound half of a physical connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, HyperliquidError>> + Send>>;

/// One physical, already-open connection.
pub struct Connection {
    /// Text frames to the peer.
    pub sink: FrameSink,
    /// Frames from the peer. Ending without [`Frame::Close`] is an abnormal close.
    pub stream: FrameStream,
}

impl Connection {
    /// Wrap a sink and stream pair.
    pub fn new<S, T>(sink: S, stream: T) -> Self
    where
        S: Sink<String, Error = HyperliquidError> + Send + 'static,
        T: Stream<Item = Result<Frame, HyperliquidError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self) -> Result<Connection, HyperliquidError>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
}

impl TungsteniteConnector {
    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, HyperliquidError> {
        let url = url.into();
        url::Url::parse(&url)?;
        Ok(Self { url })
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self) -> Result<Connection, HyperliquidError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(HyperliquidError::from)
            .with(|text: String| future::ready(Ok::<_, HyperliquidError>(Message::text(text))));

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        tracing::warn!("Dropping non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => Some(Ok(Frame::Close(match frame {
                    Some(frame) => CloseEvent::new(u16::from(frame.code), frame.reason.as_str(), true),
                    None => CloseEvent::new(CLOSE_NO_STATUS, "", true),
                }))),
                Ok(_) => None,
                Err(e) => Some(Err(HyperliquidError::from(e))),
            })
        });

        Ok(Connection::new(sink, stream))
    }
}

/// Lifecycle state of a [`ReconnectingSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; sends go straight to the wire.
    Open,
    /// Disconnected and waiting to retry.
    Closed,
    /// Permanently closed.
    Terminated,
}

/// Kind of a [`SocketEvent`], used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`SocketEvent::Open`].
    Open,
    /// See [`SocketEvent::Message`].
    Message,
    /// See [`SocketEvent::Close`].
    Close,
    /// See [`SocketEvent::Error`].
    Error,
    /// See [`SocketEvent::Terminated`].
    Terminated,
}

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A connection opened.
    Open,
    /// A text message arrived.
    Message(String),
    /// The connection closed and a reconnect is scheduled.
    Close(CloseEvent),
    /// A connection attempt or an open connection failed.
    Error(String),
    /// The socket is permanently closed.
    Terminated(ReconnectError),
}

impl SocketEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::Open => EventKind::Open,
            SocketEvent::Message(_) => EventKind::Message,
            SocketEvent::Close(_) => EventKind::Close,
            SocketEvent::Error(_) => EventKind::Error,
            SocketEvent::Terminated(_) => EventKind::Terminated,
        }
    }
}

/// Handle returned by [`ReconnectingSocket::on`], used with [`ReconnectingSocket::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    handler: Handler,
}

struct Shared {
    /// Writer queue of the open connection, if any.
    outbound: Option<mpsc::UnboundedSender<String>>,
    buffer: Box<dyn MessageBuffer>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    terminal: Option<ReconnectError>,
    /// Consecutive connection attempts since the last open.
    attempt: u32,
}

struct SocketInner {
    shared: Mutex<Shared>,
    state: watch::Sender<ConnectionState>,
    terminated: CancellationToken,
    config: ReconnectConfig,
    started: AtomicBool,
}

/// A WebSocket that reconnects on involuntary closes.
///
/// Cloning yields another handle to the same socket. The background task
/// runs until [`close`](Self::close) is called or the reconnection policy
/// gives up.
#[derive(Clone)]
pub struct ReconnectingSocket {
    inner: Arc<SocketInner>,
}

impl fmt::Debug for ReconnectingSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("state", &self.state())
            .field("terminal", &self.terminal_error())
            .field("buffered", &self.buffered_len())
            .finish()
    }
}

impl ReconnectingSocket {
    /// Start connecting with a bounded FIFO buffer of `config.buffer_capacity`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new<C: Connector>(connector: C, config: ReconnectConfig) -> Self {
        let buffer = Box::new(FifoMessageBuffer::new(config.buffer_capacity));
        Self::with_buffer(connector, config, buffer)
    }

    /// Start connecting with a custom buffering strategy.
    pub fn with_buffer<C: Connector>(
        connector: C,
        config: ReconnectConfig,
        buffer: Box<dyn MessageBuffer>,
    ) -> Self {
        let socket = Self::unstarted(config, buffer);
        socket.start(Arc::new(connector));
        socket
    }

    /// Build the socket without connecting, so listeners can be attached
    /// before the first event.
    pub(crate) fn unstarted(config: ReconnectConfig, buffer: Box<dyn MessageBuffer>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Arc::new(SocketInner {
                shared: Mutex::new(Shared {
                    outbound: None,
                    buffer,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    terminal: None,
                    attempt: 0,
                }),
                state,
                terminated: CancellationToken::new(),
                config,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the connection task. Later calls are no-ops.
    pub(crate) fn start(&self, connector: Arc<dyn Connector>) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(run(self.inner.clone(), connector));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// `true` while a connection is open.
    pub fn is_open(&self) -> bool {
        self.inner.shared.lock().outbound.is_some()
    }

    /// `true` once the socket is permanently closed.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.is_cancelled()
    }

    /// Why the socket terminated, if it has.
    pub fn terminal_error(&self) -> Option<ReconnectError> {
        self.inner.shared.lock().terminal.clone()
    }

    /// Resolves once the socket is permanently closed.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.inner.terminated.cancelled()
    }

    pub(crate) fn termination_token(&self) -> CancellationToken {
        self.inner.terminated.clone()
    }

    /// Number of messages waiting for the next open.
    pub fn buffered_len(&self) -> usize {
        self.inner.shared.lock().buffer.len()
    }

    /// Send a text message.
    ///
    /// While open the message is written immediately. Otherwise it is
    /// buffered; a buffered message whose `cancel` token fires before the
    /// next open is dropped. Fails synchronously once terminated.
    pub fn send(
        &self,
        payload: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), SendError> {
        let payload = payload.into();
        let mut shared = self.inner.shared.lock();
        if let Some(cause) = &shared.terminal {
            return Err(SendError::Terminated(cause.clone()));
        }

        let payload = match &shared.outbound {
            Some(tx) => match tx.send(payload) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(payload)) => payload,
            },
            None => payload,
        };

        if shared.buffer.push(payload, cancel) {
            tracing::trace!(buffered = shared.buffer.len(), "Buffered outbound message");
            Ok(())
        } else {
            Err(SendError::BufferFull)
        }
    }

    /// Send only if a connection is open right now. Returns whether it was sent.
    pub(crate) fn send_if_open(&self, payload: &str) -> bool {
        let shared = self.inner.shared.lock();
        match &shared.outbound {
            Some(tx) => tx.send(payload.to_string()).is_ok(),
            None => false,
        }
    }

    /// Close permanently. Idempotent.
    pub fn close(&self) {
        self.inner.terminate(ReconnectError::TerminatedByUser);
    }

    /// Register a listener for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.inner.add_listener(kind, false, Arc::new(handler))
    }

    /// Register a listener for the next event of `kind` only.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.inner.add_listener(kind, true, Arc::new(handler))
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut shared = self.inner.shared.lock();
        let before = shared.listeners.len();
        shared.listeners.retain(|listener| listener.id != id);
        shared.listeners.len() != before
    }
}

impl SocketInner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn add_listener(&self, kind: EventKind, once: bool, handler: Handler) -> ListenerId {
        let mut shared = self.shared.lock();
        let id = ListenerId(shared.next_listener_id);
        shared.next_listener_id += 1;
        // Terminated sockets never emit again.
        if shared.terminal.is_none() {
            shared.listeners.push(Listener {
                id,
                kind,
                once,
                handler,
            });
        }
        id
    }

    /// Call the listeners of `event`. Handlers run without the lock held.
    fn dispatch(&self, event: SocketEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let mut shared = self.shared.lock();
            let handlers = shared
                .listeners
                .iter()
                .filter(|listener| listener.kind == kind)
                .map(|listener| listener.handler.clone())
                .collect();
            shared
                .listeners
                .retain(|listener| !(listener.once && listener.kind == kind));
            handlers
        };

        for handler in handlers {
            handler(&event);
        }
    }

    /// Enter the terminal state. Returns `false` if already terminal.
    fn terminate(&self, cause: ReconnectError) -> bool {
        let listeners = {
            let mut shared = self.shared.lock();
            if shared.terminal.is_some() {
                return false;
            }
            shared.terminal = Some(cause.clone());
            shared.buffer.clear();
            shared.outbound = None;
            std::mem::take(&mut shared.listeners)
        };

        self.set_state(ConnectionState::Terminated);
        self.terminated.cancel();

        match &cause {
            ReconnectError::TerminatedByUser => tracing::info!("WebSocket closed by user"),
            other => tracing::warn!(cause = %other, "WebSocket terminated"),
        }

        let event = SocketEvent::Terminated(cause);
        for listener in listeners
            .into_iter()
            .filter(|listener| listener.kind == EventKind::Terminated)
        {
            (listener.handler)(&event);
        }
        true
    }

    /// Decide what follows an involuntary close: the delay before the next
    /// attempt, or `None` when the socket is (now) terminal.
    fn handle_involuntary_close(&self, event: CloseEvent) -> Option<Duration> {
        let attempt = {
            let mut shared = self.shared.lock();
            if shared.terminal.is_some() {
                return None;
            }
            shared.attempt = shared.attempt.saturating_add(1);
            shared.attempt
        };

        tracing::warn!(
            code = event.code,
            reason = %event.reason,
            attempt,
            "WebSocket closed"
        );

        if attempt >= self.config.max_attempts {
            self.terminate(ReconnectError::ReconnectionLimitReached { attempts: attempt });
            return None;
        }
        if let Some(predicate) = &self.config.should_reconnect {
            if !predicate(&event) {
                self.terminate(ReconnectError::StoppedByPredicate { code: event.code });
                return None;
            }
        }

        self.set_state(ConnectionState::Closed);
        self.dispatch(SocketEvent::Close(event));

        let delay = self.config.delay.delay(attempt);
        tracing::debug!(?delay, attempt, "Reconnecting after delay");
        Some(delay)
    }

    /// Pump one open connection until it closes. Returns `None` when the
    /// socket was terminated meanwhile.
    async fn drive(&self, connection: Connection) -> Option<CloseEvent> {
        let Connection {
            mut sink,
            mut stream,
        } = connection;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let accepted = {
            let mut shared = self.shared.lock();
            if shared.terminal.is_some() {
                false
            } else {
                shared.attempt = 0;
                let mut flushed = 0usize;
                while let Some(payload) = shared.buffer.shift() {
                    let _ = tx.send(payload);
                    flushed += 1;
                }
                shared.outbound = Some(tx);
                if flushed > 0 {
                    tracing::debug!(flushed, "Flushing buffered messages");
                }
                true
            }
        };
        if !accepted {
            let _ = sink.close().await;
            return None;
        }

        self.set_state(ConnectionState::Open);
        tracing::info!("WebSocket connected");
        self.dispatch(SocketEvent::Open);

        let close = loop {
            tokio::select! {
                biased;
                _ = self.terminated.cancelled() => {
                    let _ = sink.close().await;
                    break None;
                }
                Some(payload) = rx.recv() => {
                    if let Err(e) = sink.send(payload).await {
                        tracing::warn!(error = %e, "WebSocket send failed");
                        break Some(CloseEvent::abnormal(e.to_string()));
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => self.dispatch(SocketEvent::Message(text)),
                    Some(Ok(Frame::Close(event))) => break Some(event),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        self.dispatch(SocketEvent::Error(e.to_string()));
                        break Some(CloseEvent::abnormal(e.to_string()));
                    }
                    None => break Some(CloseEvent::abnormal("connection closed without a close frame")),
                }
            }
        };

        self.shared.lock().outbound = None;
        close
    }
}

/// Connection task: connect, pump, back off, repeat until terminal.
async fn run(inner: Arc<SocketInner>, connector: Arc<dyn Connector>) {
    loop {
        if inner.terminated.is_cancelled() {
            break;
        }
        inner.set_state(ConnectionState::Connecting);
        tracing::debug!("Connecting WebSocket");

        let attempt = tokio::select! {
            biased;
            _ = inner.terminated.cancelled() => break,
            result = tokio::time::timeout(inner.config.connect_timeout, connector.connect()) => result,
        };

        let close = match attempt {
            Ok(Ok(connection)) => match inner.drive(connection).await {
                Some(close) => close,
                None => break,
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket connection failed");
                inner.dispatch(SocketEvent::Error(e.to_string()));
                CloseEvent::abnormal(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?inner.config.connect_timeout,
                    "WebSocket connection attempt timed out"
                );
                CloseEvent::timeout()
            }
        };

        let Some(delay) = inner.handle_involuntary_close(close) else {
            break;
        };

        tokio::select! {
            biased;
            _ = inner.terminated.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!("WebSocket task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn idle_socket(capacity: usize) -> ReconnectingSocket {
        let config = ReconnectConfig {
            buffer_capacity: capacity,
            ..ReconnectConfig::default()
        };
        ReconnectingSocket::unstarted(config, Box::new(FifoMessageBuffer::new(capacity)))
    }

    #[test]
    fn test_close_event_constructors() {
        assert_eq!(CloseEvent::abnormal("x").code, CLOSE_ABNORMAL);
        let timeout = CloseEvent::timeout();
        assert_eq!(timeout.code, CLOSE_TIMEOUT);
        assert_eq!(timeout.reason, "Timeout");
        assert!(!timeout.was_clean);
    }

    #[test]
    fn test_send_before_open_is_buffered() {
        let socket = idle_socket(2);
        socket.send("a", None).unwrap();
        socket.send("b", None).unwrap();
        assert_eq!(socket.buffered_len(), 2);
        assert_eq!(socket.send("c", None), Err(SendError::BufferFull));
        assert!(!socket.is_open());
        assert!(!socket.send_if_open("ping"));
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let socket = idle_socket(4);
        socket.send("queued", None).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        socket.on(EventKind::Terminated, move |event| {
            assert_eq!(
                event,
                &SocketEvent::Terminated(ReconnectError::TerminatedByUser)
            );
            counter.fetch_add(1, Ordering::SeqCst);
        });

        socket.close();
        socket.close();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(socket.is_terminated());
        assert_eq!(socket.state(), ConnectionState::Terminated);
        assert_eq!(socket.buffered_len(), 0);
        assert_eq!(
            socket.send("late", None),
            Err(SendError::Terminated(ReconnectError::TerminatedByUser))
        );
    }

    #[test]
    fn test_once_and_off() {
        let socket = idle_socket(4);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        socket.once(EventKind::Open, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        let id = socket.on(EventKind::Open, move |_| {
            h.fetch_add(10, Ordering::SeqCst);
        });

        socket.inner.dispatch(SocketEvent::Open);
        socket.inner.dispatch(SocketEvent::Open);
        assert_eq!(hits.load(Ordering::SeqCst), 21);

        assert!(socket.off(id));
        assert!(!socket.off(id));
        socket.inner.dispatch(SocketEvent::Open);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_close_after_terminal_is_noop() {
        let config = ReconnectConfig {
            max_attempts: 1,
            ..ReconnectConfig::default()
        };
        let socket =
            ReconnectingSocket::unstarted(config, Box::new(FifoMessageBuffer::new(4)));

        assert_eq!(
            socket.inner.handle_involuntary_close(CloseEvent::abnormal("reset")),
            None
        );
        assert_eq!(
            socket.terminal_error(),
            Some(ReconnectError::ReconnectionLimitReached { attempts: 1 })
        );
        assert_eq!(
            socket.inner.handle_involuntary_close(CloseEvent::abnormal("again")),
            None
        );
        assert_eq!(
            socket.terminal_error(),
            Some(ReconnectError::ReconnectionLimitReached { attempts: 1 })
        );
    }

    #[test]
    fn test_predicate_can_stop_reconnects() {
        let config = ReconnectConfig {
            should_reconnect: Some(Arc::new(|event: &CloseEvent| event.code != 4000)),
            ..ReconnectConfig::default()
        };
        let socket =
            ReconnectingSocket::unstarted(config, Box::new(FifoMessageBuffer::new(4)));

        assert!(
            socket
                .inner
                .handle_involuntary_close(CloseEvent::abnormal("reset"))
                .is_some()
        );
        assert_eq!(socket.state(), ConnectionState::Closed);

        assert_eq!(
            socket
                .inner
                .handle_involuntary_close(CloseEvent::new(4000, "banned", true)),
            None
        );
        assert_eq!(
            socket.terminal_error(),
            Some(ReconnectError::StoppedByPredicate { code: 4000 })
        );
    }
}
