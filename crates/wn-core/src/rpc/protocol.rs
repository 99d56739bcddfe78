//! JSON-RPC 2.0 wire shapes and message classification.
//!
//! Framing is line-delimited JSON: one value per newline, never an internal
//! newline in an encoded message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A request or notification id. Only strings and numbers are valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

/// A classified incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcIncoming {
    Request {
        id: RpcId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Why an incoming value failed classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcDecodeError {
    /// Not syntactically valid JSON.
    Parse,
    /// Valid JSON but not a valid JSON-RPC 2.0 request or notification.
    Invalid(&'static str),
}

/// Classify one line of input.
///
/// Validation order: JSON syntax, object shape, `jsonrpc` literal, `method`
/// string, `id` type. Response-shaped objects (`result`/`error` without
/// `method`) are not valid input for a server.
pub fn decode_incoming(line: &str) -> Result<RpcIncoming, RpcDecodeError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RpcDecodeError::Parse)?;

    let Some(obj) = value.as_object() else {
        return Err(RpcDecodeError::Invalid("not an object"));
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(RpcDecodeError::Invalid("jsonrpc must be \"2.0\""));
    }

    let method = match obj.get("method") {
        Some(Value::String(method)) => method.clone(),
        Some(_) => return Err(RpcDecodeError::Invalid("method must be a string")),
        None => {
            if obj.contains_key("result") || obj.contains_key("error") {
                return Err(RpcDecodeError::Invalid("responses are not accepted"));
            }
            return Err(RpcDecodeError::Invalid("missing method"));
        }
    };

    let params = obj.get("params").cloned();

    match obj.get("id") {
        None => Ok(RpcIncoming::Notification { method, params }),
        Some(Value::String(s)) => Ok(RpcIncoming::Request {
            id: RpcId::String(s.clone()),
            method,
            params,
        }),
        Some(Value::Number(n)) => {
            let Some(id) = n.as_i64() else {
                return Err(RpcDecodeError::Invalid("id must be an integer or string"));
            };
            Ok(RpcIncoming::Request {
                id: RpcId::Number(id),
                method,
                params,
            })
        }
        Some(_) => Err(RpcDecodeError::Invalid("id must be a string or number")),
    }
}

/// Encode a success response as one line.
pub fn encode_response(id: &RpcId, result: &Value) -> String {
    serde_json::to_string(&serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    }))
    .expect("response serialization cannot fail")
}

/// Encode an error response as one line. `id` is null for parse errors.
pub fn encode_error(id: Option<&RpcId>, code: i64, message: &str) -> String {
    serde_json::to_string(&serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {"code": code, "message": message},
    }))
    .expect("error serialization cannot fail")
}

/// Encode a server-initiated notification as one line.
pub fn encode_notification(method: &str, params: Option<&Value>) -> String {
    let mut body = serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
    });
    if let Some(params) = params {
        body["params"] = params.clone();
    }
    serde_json::to_string(&body).expect("notification serialization cannot fail")
}
