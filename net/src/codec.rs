//! Line-delimited JSON-RPC wire codec for the Electrum protocol.
//!
//! Every message, request or response, is a single JSON object terminated
//! by `\n`; this module only handles the framing and the request/response/
//! notification shape, not method-specific payloads.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A line could not be parsed as JSON at all.
    #[error("malformed JSON: {0}")]
    Json(String),

    /// The JSON value parsed but didn't have the request/response/
    /// notification shape this protocol expects.
    #[error("unrecognized message shape: {0}")]
    Shape(String),
}

/// An outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Monotonically increasing id, unique among in-flight requests on one
    /// interface.
    pub id: u64,
    /// RPC method name, e.g. `"blockchain.headers.subscribe"`.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Construct a new request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize this request to a single `\n`-terminated wire line.
    pub fn to_line(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = serde_json::to_vec(self).map_err(|e| Error::Json(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// The RPC-level error object embedded in a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcError {
    /// Server-assigned error code, when present.
    #[serde(default)]
    pub code: Option<i64>,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A decoded incoming wire frame: either a response to a request we sent,
/// or an unsolicited notification (a `.subscribe` push).
#[derive(Debug, Clone)]
pub enum Frame {
    /// A response matching a previously sent request id.
    Response {
        /// The id of the request this responds to.
        id: u64,
        /// The result payload, or the server's RPC error.
        result: Result<Value, RpcError>,
    },
    /// An unsolicited push from a prior subscription; has no `id`.
    Notification {
        /// Subscription method name.
        method: String,
        /// Positional parameters.
        params: Vec<Value>,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Vec<Value>>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Parse one `\n`-stripped wire line into a [`Frame`].
pub fn decode_line(line: &str) -> Result<Frame, Error> {
    let raw: RawFrame = serde_json::from_str(line).map_err(|e| Error::Json(e.to_string()))?;

    match raw.id {
        Some(id) => {
            let result = match raw.error {
                Some(err) => Err(err),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            Ok(Frame::Response { id, result })
        }
        None => {
            let method = raw
                .method
                .ok_or_else(|| Error::Shape(line.to_string()))?;
            Ok(Frame::Notification {
                method,
                params: raw.params.unwrap_or_default(),
            })
        }
    }
}

/// The cache key for a subscription: `method` alone, or `method:first_param`
/// when the subscription takes a parameter (e.g. a scripthash).
///
/// `scripthash.subscribe` notifications are routed back to the scripthash
/// that subscribed this way, since the notification itself only carries
/// the scripthash as its first parameter alongside the new status.
pub fn subscription_key(method: &str, params: &[Value]) -> String {
    match params.first() {
        Some(first) => format!("{}:{}", method, value_to_index_string(first)),
        None => method.to_string(),
    }
}

fn value_to_index_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_as_single_line() {
        let req = Request::new(1, "server.version", vec![Value::from("svnet"), Value::from("1.4")]);
        let line = req.to_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert!(String::from_utf8(line).unwrap().contains("server.version"));
    }

    #[test]
    fn decodes_successful_response() {
        let frame = decode_line(r#"{"id":7,"result":"ok"}"#).unwrap();
        match frame {
            Frame::Response { id, result } => {
                assert_eq!(id, 7);
                assert_eq!(result.unwrap(), Value::from("ok"));
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn decodes_error_response() {
        let frame = decode_line(r#"{"id":7,"error":{"code":1,"message":"boom"}}"#).unwrap();
        match frame {
            Frame::Response { result: Err(e), .. } => assert_eq!(e.message, "boom"),
            _ => panic!("expected an error response"),
        }
    }

    #[test]
    fn decodes_notification_without_id() {
        let frame =
            decode_line(r#"{"method":"blockchain.headers.subscribe","params":[{"height":1}]}"#)
                .unwrap();
        match frame {
            Frame::Notification { method, params } => {
                assert_eq!(method, "blockchain.headers.subscribe");
                assert_eq!(params.len(), 1);
            }
            _ => panic!("expected a notification"),
        }
    }

    #[test]
    fn subscription_key_includes_first_param() {
        let key = subscription_key("blockchain.scripthash.subscribe", &[Value::from("abcd")]);
        assert_eq!(key, "blockchain.scripthash.subscribe:abcd");
    }

    #[test]
    fn subscription_key_is_bare_method_without_params() {
        let key = subscription_key("server.peers.subscribe", &[]);
        assert_eq!(key, "server.peers.subscribe");
    }
}
