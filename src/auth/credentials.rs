//! Credential management for Hyperliquid signing.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::auth::LocalSigner;
use crate::error::{HyperliquidError, SigningError};

/// Environment variable holding the hex-encoded private key.
pub const PRIVATE_KEY_ENV: &str = "HYPERLIQUID_PRIVATE_KEY";

/// Signing credentials: a secp256k1 private key, kept out of logs.
#[derive(Clone)]
pub struct Credentials {
    private_key: SecretString,
}

impl Credentials {
    /// Create credentials from a hex-encoded private key (with or without `0x`).
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            private_key: SecretString::from(private_key.into()),
        }
    }

    /// Get the private key.
    ///
    /// This method exposes the secret - use carefully.
    pub fn expose_secret(&self) -> &str {
        self.private_key.expose_secret()
    }

    /// Build a local signer from these credentials.
    ///
    /// Fails if the key is not valid hex or is not a valid secp256k1 scalar.
    pub fn signer(&self) -> Result<LocalSigner, SigningError> {
        LocalSigner::from_hex(self.expose_secret())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Trait for providing signing credentials.
///
/// Implement this trait to customize how credentials are retrieved,
/// for example from a secrets manager.
pub trait CredentialsProvider: Send + Sync {
    /// Get the credentials.
    fn get_credentials(&self) -> &Credentials;
}

impl<P: CredentialsProvider + ?Sized> CredentialsProvider for Arc<P> {
    fn get_credentials(&self) -> &Credentials {
        (**self).get_credentials()
    }
}

/// Static credentials provider that holds credentials directly.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a new static credentials provider.
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(private_key),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Credentials provider that reads from the environment.
///
/// By default, reads `HYPERLIQUID_PRIVATE_KEY`.
#[derive(Debug)]
pub struct EnvCredentials {
    credentials: Credentials,
}

impl EnvCredentials {
    /// Read credentials from `HYPERLIQUID_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self, HyperliquidError> {
        Self::from_env_var(PRIVATE_KEY_ENV)
    }

    /// Read credentials from a custom environment variable.
    pub fn from_env_var(key_var: &str) -> Result<Self, HyperliquidError> {
        Self::try_from_env_var(key_var).ok_or(HyperliquidError::MissingCredentials)
    }

    /// Try to read credentials from `HYPERLIQUID_PRIVATE_KEY`.
    ///
    /// Returns `None` if the variable is not set or empty.
    pub fn try_from_env() -> Option<Self> {
        Self::try_from_env_var(PRIVATE_KEY_ENV)
    }

    /// Try to read credentials from a custom environment variable.
    ///
    /// Returns `None` if the variable is not set or empty.
    pub fn try_from_env_var(key_var: &str) -> Option<Self> {
        let private_key = std::env::var(key_var).ok()?;
        if private_key.trim().is_empty() {
            return None;
        }

        Some(Self {
            credentials: Credentials::new(private_key.trim()),
        })
    }
}

impl CredentialsProvider for EnvCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}
