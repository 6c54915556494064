//! JSON-RPC 2.0 service over HTTP/1.1.
//!
//! Methods:
//! - `account` → the operating account
//! - `get_balances` → non-zero balances
//! - `transfer` `{to, asset, amount, memo}` → transfer receipt, via the send pool
//! - `get_transfer_fees` `{assets}` → one fee quote per asset
//!
//! `GET /health` reports the node connection state.

use crate::{
    connection::{ConnectionState, NodeConnection},
    error::Error,
    send_pool::SendWorkerPool,
    wallet::{TransferRequest, Wallet},
};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const NODE_ERROR: i32 = -32000;
pub const MISSING_KEY: i32 = -32001;

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC error
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
            }),
            id,
        }
    }

    fn from_error(id: Value, err: &Error) -> Self {
        Self::error(id, error_code(err), &err.to_string())
    }
}

/// JSON-RPC code for a gateway error.
pub fn error_code(err: &Error) -> i32 {
    match err {
        Error::Validation(_) => INVALID_PARAMS,
        Error::MissingKey(_) => MISSING_KEY,
        _ => NODE_ERROR,
    }
}

/// Shared service state
pub struct ServiceState {
    pub wallet: Arc<Wallet>,
    pub pool: Arc<SendWorkerPool>,
    pub connection: NodeConnection,
}

/// Bind `addr` and serve until the task is dropped.
pub async fn start_rpc_server(addr: SocketAddr, state: Arc<ServiceState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve connections accepted on `listener`.
pub async fn serve(listener: TcpListener, state: Arc<ServiceState>) -> std::io::Result<()> {
    info!("RPC server listening on {}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(|req| handle_request(req, state.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServiceState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == "/health" {
        return Ok(json_response(StatusCode::OK, &health(&state.connection.state())));
    }
    if req.method() != Method::POST {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }

    let body_bytes = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Failed to read request body: {}", e);
            return Ok(text_response(StatusCode::BAD_REQUEST, "Failed to read body"));
        }
    };

    let response = match serde_json::from_slice::<JsonRpcRequest>(&body_bytes) {
        Ok(request) => {
            debug!("RPC request: {} (id: {})", request.method, request.id);
            handle_rpc_method(&request, &state).await
        }
        Err(e) => {
            debug!("Failed to parse JSON-RPC request: {}", e);
            JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error")
        }
    };

    Ok(json_response(StatusCode::OK, &response))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response
}

fn health(state: &ConnectionState) -> Value {
    match state {
        ConnectionState::Ready { generation } => json!({"status": "ready", "generation": generation}),
        ConnectionState::Connecting => json!({"status": "connecting"}),
        ConnectionState::Disconnected => json!({"status": "disconnected"}),
        ConnectionState::Failed(reason) => json!({"status": "failed", "reason": reason}),
        ConnectionState::Closed => json!({"status": "closed"}),
    }
}

/// Route one request to the wallet.
pub async fn handle_rpc_method(request: &JsonRpcRequest, state: &ServiceState) -> JsonRpcResponse {
    let id = request.id.clone();

    let result = match request.method.as_str() {
        "account" => state.wallet.account().await.and_then(to_json),
        "get_balances" => state.wallet.get_balances().await.and_then(to_json),
        "get_transfer_fees" => match fee_params(&request.params) {
            Ok(assets) => state.wallet.transfer_fees(&assets).await.and_then(to_json),
            Err(e) => Err(e),
        },
        "transfer" => match transfer_params(&request.params) {
            Ok(transfer) => state.pool.submit(transfer).await.and_then(to_json),
            Err(e) => Err(e),
        },
        _ => {
            return JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            )
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            debug!("RPC {} failed: {}", request.method, e);
            JsonRpcResponse::from_error(id, &e)
        }
    }
}

fn to_json<T: Serialize>(value: T) -> crate::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// `[to, asset, amount, memo?]` or `{to, asset, amount, memo}`.
pub fn transfer_params(params: &Value) -> crate::Result<TransferRequest> {
    let field = |name: &str, index: usize| match params {
        Value::Array(items) => items.get(index),
        Value::Object(map) => map.get(name),
        _ => None,
    };
    let text = |name: &str, index: usize| -> crate::Result<String> {
        match field(name, index) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) if name == "amount" => Ok(n.to_string()),
            _ => Err(Error::validation(format!("missing parameter {}", name))),
        }
    };

    let memo = match field("memo", 3) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(Error::validation("memo must be a string")),
    };
    Ok(TransferRequest {
        to: text("to", 0)?,
        asset: text("asset", 1)?,
        amount: text("amount", 2)?,
        memo,
    })
}

/// `[[a, b]]`, `[a, b]` or `{assets: [a, b]}`.
pub fn fee_params(params: &Value) -> crate::Result<Vec<String>> {
    let list = match params {
        Value::Array(items) => match items.as_slice() {
            [Value::Array(inner)] => inner,
            _ => items,
        },
        Value::Object(map) => match map.get("assets") {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::validation("missing parameter assets")),
        },
        _ => return Err(Error::validation("missing parameter assets")),
    };

    let assets = list
        .iter()
        .map(|item| match item {
            Value::String(s) if !s.is_empty() => Ok(s.clone()),
            _ => Err(Error::validation("assets must be symbols or ids")),
        })
        .collect::<crate::Result<Vec<_>>>()?;
    if assets.is_empty() {
        return Err(Error::validation("no assets requested"));
    }
    Ok(assets)
}
