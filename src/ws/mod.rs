//! Hyperliquid WebSocket transport.
//!
//! Provides a reconnecting socket and a request multiplexer on top of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use hyperliquid_api_client::ws::{RequestKind, WsConfig, WsTransport};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = WsTransport::connect(WsConfig::default())?;
//!
//!     // Query through the multiplexer
//!     let meta = transport
//!         .request(RequestKind::Info, json!({ "type": "meta" }), None)
//!         .await?;
//!     println!("Meta: {meta}");
//!
//!     // Stream trades
//!     let mut events = transport.events();
//!     transport
//!         .subscribe(json!({ "type": "trades", "coin": "BTC" }), None)
//!         .await?;
//!     while let Ok(message) = events.recv().await {
//!         println!("{}: {}", message.channel, message.data);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod buffer;
mod config;
pub mod messages;
mod socket;
mod transport;

pub use buffer::{BufferedMessage, DEFAULT_BUFFER_CAPACITY, FifoMessageBuffer, MessageBuffer};
pub use config::{
    ReconnectConfig, ReconnectDelay, ReconnectPredicate, WsConfig, WsConfigBuilder, endpoints,
};
pub use messages::{ChannelMessage, RequestKind};
pub use socket::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_TIMEOUT, CloseEvent, Connection, ConnectionState,
    Connector, EventKind, Frame, FrameSink, FrameStream, ListenerId, ReconnectingSocket,
    SocketEvent, TungsteniteConnector,
};
pub use transport::WsTransport;
