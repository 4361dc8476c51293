//! Wire envelopes of the Hyperliquid WebSocket API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keep-alive frame. The server answers on the `pong` channel.
pub const PING: &str = r#"{"method":"ping"}"#;

/// Inbound channel names.
pub mod channels {
    /// Response to a `post` request.
    pub const POST: &str = "post";
    /// Server-side error, usually about one request.
    pub const ERROR: &str = "error";
    /// Acknowledgement of a subscribe or unsubscribe.
    pub const SUBSCRIPTION_RESPONSE: &str = "subscriptionResponse";
    /// Answer to [`PING`](super::PING).
    pub const PONG: &str = "pong";
}

/// Kind of a `post` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Read-only query.
    Info,
    /// Signed exchange action.
    Action,
}

/// `{ "method": "post", "id": n, "request": { "type": kind, "payload": ... } }`
#[derive(Debug, Clone, Serialize)]
pub struct PostRequest<'a> {
    method: &'static str,
    /// Correlation id.
    pub id: u64,
    /// Request body.
    pub request: PostBody<'a>,
}

impl<'a> PostRequest<'a> {
    /// Create a post envelope.
    pub fn new(id: u64, kind: RequestKind, payload: &'a Value) -> Self {
        Self {
            method: "post",
            id,
            request: PostBody { kind, payload },
        }
    }
}

/// Body of a [`PostRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct PostBody<'a> {
    /// Request kind.
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Request payload.
    pub payload: &'a Value,
}

/// Subscription method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMethod {
    /// Start a stream.
    Subscribe,
    /// Stop a stream.
    Unsubscribe,
}

impl SubscriptionMethod {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionMethod::Subscribe => "subscribe",
            SubscriptionMethod::Unsubscribe => "unsubscribe",
        }
    }
}

/// `{ "method": "subscribe" | "unsubscribe", "subscription": {...} }`
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest<'a> {
    /// Subscribe or unsubscribe.
    pub method: SubscriptionMethod,
    /// Subscription descriptor, e.g. `{"type":"trades","coin":"BTC"}`.
    pub subscription: &'a Value,
}

/// Any inbound message: `{ "channel": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelMessage {
    /// Channel name.
    pub channel: String,
    /// Channel payload.
    #[serde(default)]
    pub data: Value,
}

/// `data` of a `post` channel message.
#[derive(Debug, Clone, Deserialize)]
pub struct PostResponseData {
    /// Correlation id.
    pub id: u64,
    /// Response body.
    pub response: PostResponse,
}

/// `{ "type": "info" | "action" | "error", "payload": ... }`
#[derive(Debug, Clone, Deserialize)]
pub struct PostResponse {
    /// Response type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Response payload.
    #[serde(default)]
    pub payload: Value,
}

/// `data` of a `subscriptionResponse` channel message.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    /// Echoed method.
    pub method: String,
    /// Echoed subscription.
    pub subscription: Value,
}

/// Find the request id embedded in an `error` channel message.
///
/// The server reports failed posts as free text that quotes the offending
/// request, e.g. `... {"method":"post","id":42,"request":...}`. The first
/// `"id":` followed by digits and a comma wins.
pub fn extract_request_id(text: &str) -> Option<u64> {
    const NEEDLE: &str = "\"id\":";

    text.match_indices(NEEDLE).find_map(|(start, _)| {
        let rest = &text[start + NEEDLE.len()..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || rest.as_bytes().get(digits) != Some(&b',') {
            return None;
        }
        rest[..digits].parse().ok()
    })
}

/// Key under which a subscription ack is matched to its request.
///
/// Object keys are sorted, `null` members dropped and strings lowercased,
/// so the server's echo matches regardless of key order or address casing.
pub fn subscription_key(method: &str, subscription: &Value) -> String {
    let mut key = String::with_capacity(64);
    key.push_str(&method.to_ascii_lowercase());
    key.push(':');
    write_canonical(subscription, &mut key);
    key
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => out.push_str(&Value::String(s.to_lowercase()).to_string()),
        other => out.push_str(&other.to_string()),
    }
}
