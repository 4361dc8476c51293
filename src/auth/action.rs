//! Typed-data construction for Hyperliquid exchange actions.
//!
//! There are two signing schemes:
//!
//! - **L1 actions** (orders, cancels, leverage updates, ...) are msgpack
//!   encoded and hashed into a `connectionId`, which is then signed as an
//!   `Agent` struct under the fixed `Exchange` domain.
//! - **User-signed actions** (transfers, withdrawals, approvals) are signed
//!   directly as typed data under the `HyperliquidSignTransaction` domain.

use alloy_primitives::{Address, B256, keccak256};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::eip712::{Eip712Domain, TypedData, TypedDataField, Types};
use crate::error::{HyperliquidError, TypedDataError};

/// Chain id of the L1 `Exchange` signing domain.
pub const L1_CHAIN_ID: u64 = 1337;

/// Chain id used by the reference clients for user-signed actions (Arbitrum Sepolia).
pub const DEFAULT_SIGNATURE_CHAIN_ID: u64 = 421_614;

/// Which Hyperliquid network a signature is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production.
    #[default]
    Mainnet,
    /// Testnet.
    Testnet,
}

impl Network {
    /// `true` for mainnet.
    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    /// The `source` field of the L1 `Agent` struct.
    pub fn agent_source(self) -> &'static str {
        match self {
            Network::Mainnet => "a",
            Network::Testnet => "b",
        }
    }

    /// The `hyperliquidChain` value of user-signed actions.
    pub fn chain_name(self) -> &'static str {
        match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
        }
    }
}

/// Compute the `connectionId` of an L1 action.
///
/// ```text
/// keccak256(msgpack(action) || nonce_be || vault_flag [|| vault] [|| 0x00 || expires_after_be])
/// ```
///
/// The action is serialized with named fields in declaration order, so the
/// caller's struct (or `serde_json::Value` with preserved key order) decides
/// the exact bytes.
pub fn action_hash<A: Serialize + ?Sized>(
    action: &A,
    nonce: u64,
    vault_address: Option<Address>,
    expires_after: Option<u64>,
) -> Result<B256, HyperliquidError> {
    let mut bytes = rmp_serde::to_vec_named(action)?;
    bytes.extend_from_slice(&nonce.to_be_bytes());
    match vault_address {
        Some(vault) => {
            bytes.push(1);
            bytes.extend_from_slice(vault.as_slice());
        }
        None => bytes.push(0),
    }
    if let Some(expires_after) = expires_after {
        bytes.push(0);
        bytes.extend_from_slice(&expires_after.to_be_bytes());
    }
    Ok(keccak256(bytes))
}

/// The `Agent` typed data signed for an L1 action.
pub fn l1_typed_data(connection_id: B256, network: Network) -> TypedData {
    let mut types = Types::new();
    types.insert(
        "Agent".to_string(),
        vec![
            TypedDataField::new("source", "string"),
            TypedDataField::new("connectionId", "bytes32"),
        ],
    );

    TypedData::new(
        Eip712Domain::new("Exchange", "1", L1_CHAIN_ID, Address::ZERO),
        types,
        "Agent",
        json!({
            "source": network.agent_source(),
            "connectionId": format!("0x{}", hex::encode(connection_id)),
        }),
    )
}

/// Prepare a user-signed action and return the typed data to sign.
///
/// `action` must be a JSON object. `hyperliquidChain` and `signatureChainId`
/// are written into it, so the same object is what gets posted. `fields` is
/// the schema of `primary_type`, e.g. `HyperliquidTransaction:UsdSend`.
pub fn user_signed_typed_data(
    action: &mut Value,
    primary_type: &str,
    fields: Vec<TypedDataField>,
    signature_chain_id: u64,
    network: Network,
) -> Result<TypedData, TypedDataError> {
    let object: &mut Map<String, Value> = action.as_object_mut().ok_or_else(|| {
        TypedDataError::invalid(primary_type, "user-signed action must be an object")
    })?;
    object.insert(
        "hyperliquidChain".to_string(),
        Value::String(network.chain_name().to_string()),
    );
    object.insert(
        "signatureChainId".to_string(),
        Value::String(format!("0x{signature_chain_id:x}")),
    );

    let mut types = Types::new();
    types.insert(primary_type.to_string(), fields);

    Ok(TypedData::new(
        Eip712Domain::new(
            "HyperliquidSignTransaction",
            "1",
            signature_chain_id,
            Address::ZERO,
        ),
        types,
        primary_type,
        action.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[derive(Serialize)]
    struct Noop {
        r#type: &'static str,
    }

    #[test]
    fn test_action_hash_layout() {
        let action = Noop { r#type: "noop" };
        let nonce = 1_700_000_000_000u64;

        let mut expected = rmp_serde::to_vec_named(&action).unwrap();
        expected.extend_from_slice(&nonce.to_be_bytes());
        expected.push(0);
        assert_eq!(
            action_hash(&action, nonce, None, None).unwrap(),
            keccak256(&expected)
        );

        let vault = Address::repeat_byte(0xaa);
        let mut expected = rmp_serde::to_vec_named(&action).unwrap();
        expected.extend_from_slice(&nonce.to_be_bytes());
        expected.push(1);
        expected.extend_from_slice(vault.as_slice());
        expected.push(0);
        expected.extend_from_slice(&42u64.to_be_bytes());
        assert_eq!(
            action_hash(&action, nonce, Some(vault), Some(42)).unwrap(),
            keccak256(&expected)
        );
    }

    #[test]
    fn test_action_hash_depends_on_every_input() {
        let action = Noop { r#type: "noop" };
        let base = action_hash(&action, 1, None, None).unwrap();
        assert_ne!(base, action_hash(&action, 2, None, None).unwrap());
        assert_ne!(
            base,
            action_hash(&action, 1, Some(Address::ZERO), None).unwrap()
        );
        assert_ne!(base, action_hash(&action, 1, None, Some(0)).unwrap());
    }

    #[test]
    fn test_value_actions_keep_key_order() {
        let ordered: Value = serde_json::from_str(r#"{"type":"order","grouping":"na"}"#).unwrap();
        let reversed: Value = serde_json::from_str(r#"{"grouping":"na","type":"order"}"#).unwrap();
        assert_ne!(
            action_hash(&ordered, 1, None, None).unwrap(),
            action_hash(&reversed, 1, None, None).unwrap()
        );
    }

    #[test]
    fn test_agent_digest_is_pinned() {
        let connection_id = keccak256("connection");
        let typed = l1_typed_data(connection_id, Network::Mainnet);
        assert_eq!(typed.message["source"], "a");
        assert_eq!(
            typed.digest().unwrap(),
            B256::from_str("0x175108c16b551a62cac7efcf5bfbec293de3ef50dcded78ccd364d6345e1d7c9")
                .unwrap()
        );

        let testnet = l1_typed_data(connection_id, Network::Testnet);
        assert_eq!(testnet.message["source"], "b");
        assert_ne!(testnet.digest().unwrap(), typed.digest().unwrap());
    }

    #[test]
    fn test_user_signed_action_injects_chain() {
        let mut action = json!({
            "type": "usdSend",
            "destination": "0x0000000000000000000000000000000000000001",
            "amount": "1",
            "time": 1_700_000_000_000u64
        });
        let fields = vec![
            TypedDataField::new("hyperliquidChain", "string"),
            TypedDataField::new("destination", "string"),
            TypedDataField::new("amount", "string"),
            TypedDataField::new("time", "uint64"),
        ];

        let typed = user_signed_typed_data(
            &mut action,
            "HyperliquidTransaction:UsdSend",
            fields,
            DEFAULT_SIGNATURE_CHAIN_ID,
            Network::Testnet,
        )
        .unwrap();

        assert_eq!(action["hyperliquidChain"], "Testnet");
        assert_eq!(action["signatureChainId"], "0x66eee");
        assert_eq!(typed.domain.name, "HyperliquidSignTransaction");
        assert_eq!(typed.domain.chain_id, DEFAULT_SIGNATURE_CHAIN_ID);
        assert!(typed.digest().is_ok());
    }

    #[test]
    fn test_user_signed_action_must_be_object() {
        let mut action = json!(["not", "an", "object"]);
        assert!(
            user_signed_typed_data(&mut action, "X", Vec::new(), 1, Network::Mainnet).is_err()
        );
    }
}
