//! Authentication module for Hyperliquid actions.
//!
//! This module provides:
//! - Credential management with secure secret storage
//! - Nonce generation for replay protection
//! - EIP-712 signing with local or delegated signers
//! - L1 and user-signed action payload construction

mod action;
mod credentials;
mod nonce;
mod signature;

pub use action::{
    DEFAULT_SIGNATURE_CHAIN_ID, L1_CHAIN_ID, Network, action_hash, l1_typed_data,
    user_signed_typed_data,
};
pub use credentials::{
    Credentials, CredentialsProvider, EnvCredentials, PRIVATE_KEY_ENV, StaticCredentials,
};
pub use nonce::{IncreasingNonce, NonceProvider};
pub use signature::{
    LocalSigner, SECP256K1_ORDER, Signature, TypedDataSigner, parse_private_key, sign_digest,
    validate_private_key,
};
