//! EIP-712 typed structured data hashing.
//!
//! Hyperliquid authenticates every state-changing request with a signature
//! over an EIP-712 digest:
//!
//! ```text
//! keccak256(0x19 0x01 || domainSeparator || hashStruct(primaryType, message))
//! ```
//!
//! The schema is data rather than Rust types, so the same hasher serves L1
//! agent payloads, user-signed actions and anything a delegated signer needs.
//!
//! # Example
//!
//! ```rust
//! use hyperliquid_api_client::eip712::{Eip712Domain, TypedData, TypedDataField, Types};
//! use alloy_primitives::Address;
//! use serde_json::json;
//!
//! let mut types = Types::new();
//! types.insert(
//!     "Mail".to_string(),
//!     vec![
//!         TypedDataField::new("to", "address"),
//!         TypedDataField::new("contents", "string"),
//!     ],
//! );
//!
//! let typed = TypedData::new(
//!     Eip712Domain::new("Test", "1", 1, Address::ZERO),
//!     types,
//!     "Mail",
//!     json!({ "to": "0x0000000000000000000000000000000000000001", "contents": "hi" }),
//! );
//! let digest = typed.digest().unwrap();
//! assert_eq!(digest.len(), 32);
//! ```

mod encode;

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::TypedDataError;

pub use encode::{encode_type, encode_value, hash_struct, type_hash};

/// Canonical type string of the fixed domain schema.
pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// One `(name, type)` entry of a struct definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDataField {
    /// Field name.
    pub name: String,
    /// Field type, e.g. `uint64`, `address`, `string[]` or a struct name.
    #[serde(rename = "type")]
    pub r#type: String,
}

impl TypedDataField {
    /// Create a field definition.
    pub fn new(name: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: r#type.into(),
        }
    }
}

/// Struct definitions keyed by type name. Field order inside each entry is
/// the declared order and is what gets hashed.
pub type Types = BTreeMap<String, Vec<TypedDataField>>;

/// The signing domain. Its schema is fixed to
/// `name`, `version`, `chainId`, `verifyingContract`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
    /// Chain id.
    pub chain_id: u64,
    /// Verifying contract address.
    pub verifying_contract: Address,
}

impl Eip712Domain {
    /// Create a domain.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract,
        }
    }

    /// The domain separator: `hashStruct(EIP712Domain, self)`.
    pub fn separator(&self) -> B256 {
        let mut encoded = Vec::with_capacity(32 * 5);
        encoded.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).as_slice());
        encoded.extend_from_slice(keccak256(self.name.as_bytes()).as_slice());
        encoded.extend_from_slice(keccak256(self.version.as_bytes()).as_slice());
        encoded.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        encoded.extend_from_slice(self.verifying_contract.into_word().as_slice());
        keccak256(encoded)
    }
}

/// A complete typed-data payload: the triple a delegated signer receives
/// plus the domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// Signing domain.
    pub domain: Eip712Domain,
    /// Struct definitions.
    pub types: Types,
    /// Name of the struct type of `message`.
    pub primary_type: String,
    /// The value being signed.
    pub message: serde_json::Value,
}

impl TypedData {
    /// Bundle a domain, schema, primary type and message.
    pub fn new(
        domain: Eip712Domain,
        types: Types,
        primary_type: impl Into<String>,
        message: serde_json::Value,
    ) -> Self {
        Self {
            domain,
            types,
            primary_type: primary_type.into(),
            message,
        }
    }

    /// Compute the EIP-712 signing digest.
    pub fn digest(&self) -> Result<B256, TypedDataError> {
        hash_typed_data(&self.domain, &self.types, &self.primary_type, &self.message)
    }
}

/// Compute `keccak256(0x19 0x01 || domainSeparator || hashStruct(message))`.
pub fn hash_typed_data(
    domain: &Eip712Domain,
    types: &Types,
    primary_type: &str,
    message: &serde_json::Value,
) -> Result<B256, TypedDataError> {
    let struct_hash = hash_struct(types, primary_type, message)?;

    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain.separator().as_slice());
    buf[34..66].copy_from_slice(struct_hash.as_slice());
    Ok(keccak256(buf))
}
