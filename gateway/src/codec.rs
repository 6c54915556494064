//! Node wire envelopes.
//!
//! Requests: `{"id": 7, "method": "call", "params": [api_id, "method", [args...]]}`.
//! Responses: `{"id": 7, "result": ...}` or `{"id": 7, "error": {"message": ..}}`.
//! Notices: `{"method": "notice", "params": [tag, [[fragment, ...], ...]]}`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription tag handed to the node with `set_subscribe_callback`.
pub const SUBSCRIPTION_TAG: u64 = 200;

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    id: u64,
    method: &'static str,
    params: (u64, &'a str, &'a [Value]),
}

/// Raw inbound frame before classification.
#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Value,
    error: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to a call; `Err` carries the node's message.
    Response {
        id: u64,
        outcome: std::result::Result<Value, String>,
    },
    /// Pushed object updates, flattened in arrival order.
    Notice { tag: Value, fragments: Vec<Value> },
    /// Anything else; ignored by the reader.
    Other,
}

/// Serialize one call request.
pub fn encode_call(id: u64, api_id: u64, method: &str, args: &[Value]) -> Result<String> {
    let request = CallRequest {
        id,
        method: "call",
        params: (api_id, method, args),
    };
    Ok(serde_json::to_string(&request)?)
}

/// Classify one text frame.
pub fn decode(text: &str) -> Result<Incoming> {
    let raw: RawMessage = serde_json::from_str(text)?;

    if let Some(id) = raw.id.as_ref().and_then(id_as_u64) {
        let outcome = match raw.error {
            Some(error) => Err(error_message(&error)),
            None => Ok(raw.result),
        };
        return Ok(Incoming::Response { id, outcome });
    }

    if raw.method.as_deref() == Some("notice") {
        let mut params = match raw.params {
            Value::Array(params) => params.into_iter(),
            _ => return Err(Error::decode("notice without params array")),
        };
        let tag = params.next().unwrap_or(Value::Null);
        let mut fragments = Vec::new();
        if let Some(Value::Array(batches)) = params.next() {
            for batch in batches {
                match batch {
                    Value::Array(items) => fragments.extend(items),
                    other => fragments.push(other),
                }
            }
        }
        return Ok(Incoming::Notice { tag, fragments });
    }

    Ok(Incoming::Other)
}

/// The id carried by a pushed fragment, if it has one.
pub fn fragment_id(fragment: &Value) -> Option<&str> {
    fragment.get("id").and_then(Value::as_str)
}

fn id_as_u64(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Prefer the node's `detail`, then `message`, then the raw error object.
fn error_message(error: &Value) -> String {
    error
        .get("detail")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
