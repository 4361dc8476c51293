//! Transport abstraction used by the exchange client.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::HyperliquidError;

pub use crate::ws::messages::RequestKind;

/// Sends one request and returns its correlated response.
///
/// Implemented by [`WsTransport`](crate::ws::WsTransport); the exchange
/// layer only depends on this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` as a `kind` request and wait for the response.
    ///
    /// Firing `cancel` abandons the request; a late response is ignored.
    async fn request(
        &self,
        kind: RequestKind,
        payload: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, HyperliquidError>;
}
