//! Error types for the Hyperliquid client library.

use thiserror::Error;

/// The main error type for all Hyperliquid client operations.
#[derive(Error, Debug)]
pub enum HyperliquidError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WebSocket communication error (with message)
    #[error("WebSocket error: {0}")]
    WebSocketMsg(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization error (L1 action hashing)
    #[error("MessagePack error: {0}")]
    Msgpack(#[from] rmp_serde::encode::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Malformed typed-data schema or value
    #[error("Typed data error: {0}")]
    TypedData(#[from] TypedDataError),

    /// Signing failed or the key is invalid
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// A request over the socket transport failed
    #[error("Request failed: {0}")]
    Request(#[from] WsRequestError),

    /// The socket reached its terminal state
    #[error("Connection terminated: {0}")]
    Terminated(#[from] ReconnectError),

    /// Missing required credentials
    #[error("Missing credentials: a private key is required for signed actions")]
    MissingCredentials,
}

/// Errors produced while hashing EIP-712 typed data.
///
/// These are always caused by malformed input and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypedDataError {
    /// The primary type or a referenced struct type is not in the schema.
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// The field type is not part of the supported EIP-712 subset.
    #[error("unsupported field type `{0}`")]
    UnsupportedType(String),

    /// A declared field is absent from the value.
    #[error("missing field `{field}` in `{type_name}`")]
    MissingField {
        /// Struct type being encoded.
        type_name: String,
        /// Declared field name.
        field: String,
    },

    /// The value does not fit its declared type.
    #[error("invalid value for `{field_type}`: {reason}")]
    InvalidValue {
        /// Declared field type.
        field_type: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl TypedDataError {
    pub(crate) fn invalid(field_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field_type: field_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors produced by the signing layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The private key is malformed, zero, or not below the curve order.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The underlying (local or delegated) signer failed.
    #[error("signer failed: {0}")]
    Signer(String),

    /// The signature components are not a valid recoverable signature.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// Why a reconnecting socket entered its terminal state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    /// Consecutive failed connection attempts reached the configured maximum.
    #[error("reconnection limit reached after {attempts} attempts")]
    ReconnectionLimitReached {
        /// Number of consecutive attempts made.
        attempts: u32,
    },

    /// The reconnection predicate declined another attempt.
    #[error("reconnection stopped by predicate (close code {code})")]
    StoppedByPredicate {
        /// Close code of the event the predicate vetoed.
        code: u16,
    },

    /// The caller closed the socket.
    #[error("terminated by user")]
    TerminatedByUser,
}

/// Errors returned synchronously by a socket send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The socket is terminal and accepts no more messages.
    #[error("socket is terminated: {0}")]
    Terminated(ReconnectError),

    /// The socket is not open and the message buffer refused the message.
    #[error("message buffer is full")]
    BufferFull,
}

/// Why a multiplexed request did not produce a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsRequestError {
    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The socket reached its terminal state.
    #[error("connection terminated: {0}")]
    Terminated(ReconnectError),

    /// The connection dropped while the request was in flight.
    #[error("connection closed while the request was in flight")]
    InvalidState,

    /// The server rejected this specific request.
    #[error("API error: {0}")]
    Api(ApiError),

    /// The socket was not open and its buffer refused the message.
    #[error("message buffer is full")]
    BufferFull,

    /// The request envelope could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialize(String),
}

impl From<SendError> for WsRequestError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Terminated(cause) => Self::Terminated(cause),
            SendError::BufferFull => Self::BufferFull,
        }
    }
}

/// An error reported by the Hyperliquid server for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Correlation id of the failed request, when known.
    pub request_id: Option<u64>,
    /// Error text as sent by the server.
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.request_id {
            Some(id) => write!(f, "request {}: {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl ApiError {
    /// Create a new API error.
    pub fn new(request_id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            request_id,
            message: message.into(),
        }
    }

    /// Check if the server reported a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        self.message.contains("rate limit") || self.message.contains("Too many")
    }
}
