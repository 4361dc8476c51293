//! # Hyperliquid Client
//!
//! An async Rust client for the Hyperliquid WebSocket API with EIP-712
//! action signing.
//!
//! ## Features
//!
//! - Reconnecting WebSocket with buffering, backoff and a terminal state
//! - Request multiplexing with correlation ids, timeouts and cancellation
//! - Subscriptions restored automatically after reconnects
//! - EIP-712 typed-data hashing matching the reference vectors bit-for-bit
//! - L1 and user-signed action signing with local or delegated signers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hyperliquid_api_client::ws::{RequestKind, WsConfig, WsTransport};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = WsTransport::connect(WsConfig::default())?;
//!     let mids = transport
//!         .request(RequestKind::Info, json!({ "type": "allMids" }), None)
//!         .await?;
//!     println!("Mids: {mids}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod eip712;
pub mod error;
pub mod exchange;
pub mod transport;
pub mod ws;

// Re-export commonly used types at crate root
pub use auth::{LocalSigner, Network, Signature, TypedDataSigner};
pub use error::{HyperliquidError, WsRequestError};
pub use exchange::ExchangeClient;
pub use transport::{RequestKind, Transport};
pub use ws::{WsConfig, WsTransport};

/// Result type alias using HyperliquidError
pub type Result<T> = std::result::Result<T, HyperliquidError>;
