//! Shared fixtures for the integration tests.
//!
//! [`MockConnector`] hands out in-memory connections whose server side is
//! driven by the test through a [`ServerHandle`]. [`LoopbackServer`] is a
//! real WebSocket server on 127.0.0.1 for exercising the tungstenite
//! connector.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hyperliquid_api_client::HyperliquidError;
use hyperliquid_api_client::ws::{
    CloseEvent, Connection, Connector, ConnectionState, Frame, ReconnectDelay, WsConfig,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);

/// Initialize tracing output, filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport config for in-memory tests: no keep-alive, fast retries.
pub fn test_config() -> WsConfig {
    WsConfig::builder()
        .url("ws://mock.invalid/ws")
        .keep_alive(None)
        .request_timeout(WAIT)
        .max_attempts(5)
        .connect_timeout(Duration::from_secs(1))
        .reconnect_delay(ReconnectDelay::Fixed(Duration::from_millis(20)))
        .build()
}

/// Wait until `state` reports `expected`.
pub async fn wait_for_state(state: &mut watch::Receiver<ConnectionState>, expected: ConnectionState) {
    tokio::time::timeout(WAIT, state.wait_for(|current| *current == expected))
        .await
        .unwrap_or_else(|_| panic!("socket never reached {expected:?}"))
        .expect("state channel closed");
}

/// What the mock does with one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Open a connection and hand its server side to the test.
    Accept,
    /// Fail immediately.
    Refuse,
    /// Never complete.
    Hang,
}

struct MockState {
    script: Mutex<VecDeque<Attempt>>,
    attempts: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerHandle>,
}

/// In-memory [`Connector`] following a script of attempts. Attempts past
/// the end of the script are accepted.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a connector and the receiver of its accepted connections.
    pub fn new(script: impl IntoIterator<Item = Attempt>) -> (Self, Servers) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(MockState {
                script: Mutex::new(script.into_iter().collect()),
                attempts: AtomicUsize::new(0),
                servers,
            }),
        };
        (connector, Servers { rx })
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, HyperliquidError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let attempt = self.state.script.lock().pop_front().unwrap_or(Attempt::Accept);

        match attempt {
            Attempt::Refuse => Err(HyperliquidError::WebSocketMsg(
                "connection refused".to_string(),
            )),
            Attempt::Hang => std::future::pending().await,
            Attempt::Accept => {
                let (client_tx, client_rx) = mpsc::unbounded_channel::<String>();
                let (server_tx, server_rx) =
                    mpsc::unbounded_channel::<Result<Frame, HyperliquidError>>();

                let sink = futures_util::sink::unfold(client_tx, |tx, text: String| async move {
                    tx.send(text)
                        .map_err(|_| HyperliquidError::WebSocketMsg("peer gone".to_string()))?;
                    Ok::<_, HyperliquidError>(tx)
                });
                let stream = UnboundedReceiverStream::new(server_rx);

                let _ = self.state.servers.send(ServerHandle {
                    inbound: client_rx,
                    outbound: server_tx,
                });
                Ok(Connection::new(sink, stream))
            }
        }
    }
}

/// Accepted connections, in order.
pub struct Servers {
    rx: mpsc::UnboundedReceiver<ServerHandle>,
}

impl Servers {
    /// Wait for the next accepted connection.
    pub async fn next(&mut self) -> ServerHandle {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("no connection was accepted")
            .expect("connector dropped")
    }

    /// Assert that no connection is accepted within `window`.
    pub async fn expect_none(&mut self, window: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(window, self.rx.recv()).await {
            panic!("unexpected connection");
        }
    }
}

/// Server side of one in-memory connection. Dropping it ends the client's
/// stream without a close frame.
pub struct ServerHandle {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Result<Frame, HyperliquidError>>,
}

impl ServerHandle {
    /// Next text sent by the client.
    pub async fn recv(&mut self) -> String {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("client sent nothing")
            .expect("client connection gone")
    }

    /// Next message sent by the client, parsed.
    pub async fn recv_json(&mut self) -> Value {
        let text = self.recv().await;
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Assert that the client sends nothing within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(text)) = tokio::time::timeout(window, self.inbound.recv()).await {
            panic!("unexpected message from client: {text}");
        }
    }

    /// Push a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.outbound.send(Ok(Frame::Text(text.into())));
    }

    /// Push a JSON message to the client.
    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    /// Answer post request `id` with an `info` payload.
    pub fn reply_info(&self, id: u64, data: Value) {
        self.send_json(json!({
            "channel": "post",
            "data": {
                "id": id,
                "response": { "type": "info", "payload": { "type": "test", "data": data } }
            }
        }));
    }

    /// Answer post request `id` with an `action` payload.
    pub fn reply_action(&self, id: u64, payload: Value) {
        self.send_json(json!({
            "channel": "post",
            "data": { "id": id, "response": { "type": "action", "payload": payload } }
        }));
    }

    /// Acknowledge a subscribe or unsubscribe.
    pub fn ack(&self, method: &str, subscription: Value) {
        self.send_json(json!({
            "channel": "subscriptionResponse",
            "data": { "method": method, "subscription": subscription }
        }));
    }

    /// Send a close frame.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self
            .outbound
            .send(Ok(Frame::Close(CloseEvent::new(code, reason, true))));
    }

    /// Fail the client's read side.
    pub fn fail(&self, message: &str) {
        let _ = self
            .outbound
            .send(Err(HyperliquidError::WebSocketMsg(message.to_string())));
    }
}

/// Hyperliquid-flavoured WebSocket server on 127.0.0.1.
///
/// Answers `post` requests by echoing the payload as `info` data, acks
/// subscriptions and answers pings.
pub struct LoopbackServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    kick: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl LoopbackServer {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind loopback listener");
        let addr = listener.local_addr().expect("no local address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let kick = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let counter = accepted.clone();
        let kick_rx = kick.clone();
        let shutdown_rx = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(serve(stream, kick_rx.clone()));
                    }
                }
            }
        });

        Self {
            addr,
            accepted,
            kick,
            shutdown,
        }
    }

    /// URL to connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drop every open connection without a close frame.
    pub fn kick(&self) {
        self.kick.notify_waiters();
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

async fn serve(stream: tokio::net::TcpStream, kick: Arc<Notify>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        let message = tokio::select! {
            _ = kick.notified() => return,
            message = read.next() => message,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        let reply = match request["method"].as_str() {
            Some("ping") => json!({ "channel": "pong" }),
            Some("post") => json!({
                "channel": "post",
                "data": {
                    "id": request["id"],
                    "response": {
                        "type": "info",
                        "payload": { "type": "echo", "data": request["request"]["payload"] }
                    }
                }
            }),
            Some(method @ ("subscribe" | "unsubscribe")) => json!({
                "channel": "subscriptionResponse",
                "data": { "method": method, "subscription": request["subscription"] }
            }),
            _ => continue,
        };
        if write.send(Message::text(reply.to_string())).await.is_err() {
            return;
        }
    }
}
