//! Signed exchange actions.
//!
//! [`ExchangeClient`] signs actions and posts them over any [`Transport`].
//! The action itself is opaque: any `Serialize` value whose field order
//! matches what the exchange expects.
//!
//! # Example
//!
//! ```rust,no_run
//! use hyperliquid_api_client::auth::{LocalSigner, Network};
//! use hyperliquid_api_client::exchange::ExchangeClient;
//! use hyperliquid_api_client::ws::{WsConfig, WsTransport};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = WsTransport::connect(WsConfig::default())?;
//!     let signer = LocalSigner::from_hex("0x...")?;
//!     let client = ExchangeClient::new(transport, signer, Network::Mainnet);
//!
//!     let response = client
//!         .l1_action(&json!({ "type": "scheduleCancel" }), None)
//!         .await?;
//!     println!("{response}");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    DEFAULT_SIGNATURE_CHAIN_ID, IncreasingNonce, Network, NonceProvider, Signature,
    TypedDataSigner, action_hash, l1_typed_data, user_signed_typed_data,
};
use crate::eip712::TypedDataField;
use crate::error::{HyperliquidError, TypedDataError};
use crate::transport::{RequestKind, Transport};

/// The body of an `action` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePayload {
    /// The signed action.
    pub action: Value,
    /// Action nonce (milliseconds).
    pub nonce: u64,
    /// Signature over the action.
    pub signature: Signature,
    /// Vault or subaccount acting, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_address: Option<Address>,
    /// Expiry timestamp in milliseconds, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<u64>,
}

/// Signs and submits exchange actions.
pub struct ExchangeClient<T: Transport, S: TypedDataSigner> {
    transport: T,
    signer: S,
    network: Network,
    vault_address: Option<Address>,
    expires_after: Option<u64>,
    signature_chain_id: u64,
    nonces: Arc<dyn NonceProvider>,
}

impl<T: Transport, S: TypedDataSigner> std::fmt::Debug for ExchangeClient<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("address", &self.signer.address())
            .field("network", &self.network)
            .field("vault_address", &self.vault_address)
            .field("expires_after", &self.expires_after)
            .finish()
    }
}

impl<T: Transport, S: TypedDataSigner> ExchangeClient<T, S> {
    /// Create a client signing with `signer` for `network`.
    pub fn new(transport: T, signer: S, network: Network) -> Self {
        Self {
            transport,
            signer,
            network,
            vault_address: None,
            expires_after: None,
            signature_chain_id: DEFAULT_SIGNATURE_CHAIN_ID,
            nonces: Arc::new(IncreasingNonce::new()),
        }
    }

    /// Act on behalf of a vault or subaccount.
    pub fn with_vault_address(mut self, vault_address: Address) -> Self {
        self.vault_address = Some(vault_address);
        self
    }

    /// Reject L1 actions reaching the exchange after `expires_after` (ms).
    pub fn with_expires_after(mut self, expires_after: u64) -> Self {
        self.expires_after = Some(expires_after);
        self
    }

    /// Chain id of the user-signed action domain.
    pub fn with_signature_chain_id(mut self, chain_id: u64) -> Self {
        self.signature_chain_id = chain_id;
        self
    }

    /// Use a custom nonce source.
    pub fn with_nonce_provider(mut self, nonces: Arc<dyn NonceProvider>) -> Self {
        self.nonces = nonces;
        self
    }

    /// The signing address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sign an L1 action (order, cancel, ...) into a ready-to-post payload.
    pub async fn sign_l1_action<A>(&self, action: &A) -> Result<ExchangePayload, HyperliquidError>
    where
        A: Serialize + Sync + ?Sized,
    {
        let nonce = self.nonces.next_nonce();
        let connection_id = action_hash(action, nonce, self.vault_address, self.expires_after)?;
        let typed_data = l1_typed_data(connection_id, self.network);
        let signature = self.signer.sign_typed_data(&typed_data).await?;

        Ok(ExchangePayload {
            action: serde_json::to_value(action)?,
            nonce,
            signature,
            vault_address: self.vault_address,
            expires_after: self.expires_after,
        })
    }

    /// Sign and submit an L1 action.
    pub async fn l1_action<A>(
        &self,
        action: &A,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, HyperliquidError>
    where
        A: Serialize + Sync + ?Sized,
    {
        let payload = self.sign_l1_action(action).await?;
        self.post(payload, cancel).await
    }

    /// Sign a user-signed action (transfer, withdrawal, approval) into a
    /// ready-to-post payload.
    ///
    /// `action` must carry its nonce in a `nonce` or `time` field; `fields`
    /// is the schema of `primary_type`.
    pub async fn sign_user_action(
        &self,
        mut action: Value,
        primary_type: &str,
        fields: Vec<TypedDataField>,
    ) -> Result<ExchangePayload, HyperliquidError> {
        let nonce = action
            .get("nonce")
            .or_else(|| action.get("time"))
            .and_then(Value::as_u64)
            .ok_or_else(|| TypedDataError::MissingField {
                type_name: primary_type.to_string(),
                field: "nonce".to_string(),
            })?;

        let typed_data = user_signed_typed_data(
            &mut action,
            primary_type,
            fields,
            self.signature_chain_id,
            self.network,
        )?;
        let signature = self.signer.sign_typed_data(&typed_data).await?;

        Ok(ExchangePayload {
            action,
            nonce,
            signature,
            vault_address: None,
            expires_after: None,
        })
    }

    /// Sign and submit a user-signed action.
    pub async fn user_action(
        &self,
        action: Value,
        primary_type: &str,
        fields: Vec<TypedDataField>,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, HyperliquidError> {
        let payload = self.sign_user_action(action, primary_type, fields).await?;
        self.post(payload, cancel).await
    }

    async fn post(
        &self,
        payload: ExchangePayload,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, HyperliquidError> {
        tracing::debug!(nonce = payload.nonce, "Posting signed action");
        let body = serde_json::to_value(&payload)?;
        self.transport.request(RequestKind::Action, body, cancel).await
    }
}
