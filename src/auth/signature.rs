//! secp256k1 signatures over EIP-712 digests.
//!
//! Hyperliquid expects signatures as `{ r, s, v }` where `r` and `s` are
//! 32-byte big-endian hex words and `v` is the recovery id plus 27.
//!
//! Signing is exposed through the [`TypedDataSigner`] trait so that an
//! external wallet can stand in for a local key: it receives the exact
//! typed-data payload and returns a signature in the same shape.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256, uint};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::eip712::TypedData;
use crate::error::{HyperliquidError, SigningError};

/// Order `n` of the secp256k1 group. Valid private keys lie in `[1, n)`.
pub const SECP256K1_ORDER: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// A recoverable ECDSA signature in Hyperliquid wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// `r` component, big-endian.
    pub r: B256,
    /// `s` component, big-endian.
    pub s: B256,
    /// Recovery id plus 27 (27 or 28).
    pub v: u8,
}

impl Signature {
    /// Recover the address that produced this signature over `digest`.
    pub fn recover_address(&self, digest: &B256) -> Result<Address, SigningError> {
        let y_parity = match self.v {
            27 | 0 => false,
            28 | 1 => true,
            other => {
                return Err(SigningError::InvalidSignature(format!(
                    "unexpected recovery byte {other}"
                )));
            }
        };
        let signature = alloy_primitives::Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            y_parity,
        );
        signature
            .recover_address_from_prehash(digest)
            .map_err(|e| SigningError::InvalidSignature(e.to_string()))
    }

    /// The 65-byte `r || s || v` encoding.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }
}

impl From<alloy_primitives::Signature> for Signature {
    fn from(sig: alloy_primitives::Signature) -> Self {
        Self {
            r: B256::from(sig.r().to_be_bytes::<32>()),
            s: B256::from(sig.s().to_be_bytes::<32>()),
            v: 27 + u8::from(sig.v()),
        }
    }
}

/// Parse a hex private key and check it is a usable secp256k1 scalar.
pub fn parse_private_key(private_key: &str) -> Result<B256, SigningError> {
    let digits = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(digits)
        .map_err(|e| SigningError::InvalidKey(format!("not valid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(SigningError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let key = B256::from_slice(&bytes);
    validate_private_key(&key)?;
    Ok(key)
}

/// Reject zero and any scalar not strictly below the curve order.
pub fn validate_private_key(key: &B256) -> Result<(), SigningError> {
    let scalar = U256::from_be_bytes(key.0);
    if scalar.is_zero() {
        return Err(SigningError::InvalidKey("key is zero".to_string()));
    }
    if scalar >= SECP256K1_ORDER {
        return Err(SigningError::InvalidKey(
            "key is not below the curve order".to_string(),
        ));
    }
    Ok(())
}

/// Deterministically sign a 32-byte digest with a raw private key.
pub fn sign_digest(private_key: &B256, digest: &B256) -> Result<Signature, SigningError> {
    LocalSigner::from_bytes(private_key)?.sign_hash(digest)
}

/// Anything that can sign EIP-712 typed data on behalf of an address.
///
/// Implementations receive the full domain, schema, primary type and message,
/// so a remote wallet can display and sign it without further context.
#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    /// Address whose signatures this signer produces.
    fn address(&self) -> Address;

    /// Sign `typed_data` and return a recoverable signature.
    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, HyperliquidError>;
}

/// Signs with an in-process private key.
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Create a signer from a hex-encoded private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> Result<Self, SigningError> {
        Self::from_bytes(&parse_private_key(private_key)?)
    }

    /// Create a signer from raw key bytes.
    pub fn from_bytes(private_key: &B256) -> Result<Self, SigningError> {
        validate_private_key(private_key)?;
        let inner = PrivateKeySigner::from_bytes(private_key)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The signer's address.
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign a prehashed digest (RFC 6979 deterministic nonce).
    pub fn sign_hash(&self, digest: &B256) -> Result<Signature, SigningError> {
        self.inner
            .sign_hash_sync(digest)
            .map(Signature::from)
            .map_err(|e| SigningError::Signer(e.to_string()))
    }
}

impl FromStr for LocalSigner {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address())
            .finish()
    }
}

#[async_trait]
impl TypedDataSigner for LocalSigner {
    fn address(&self) -> Address {
        LocalSigner::address(self)
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, HyperliquidError> {
        let digest = typed_data.digest()?;
        Ok(self.sign_hash(&digest)?)
    }
}
