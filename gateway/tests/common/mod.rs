//! Shared test infrastructure: an in-process node speaking the node wire
//! protocol over in-memory channels.
//!
//! ```ignore
//! let node = MockNode::new();
//! node.insert_object(account_json("1.2.100", "alice", &key, &memo));
//! let connection = node.connect();
//! assert!(connection.wait_until_ready().await);
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{
    channel::mpsc::{unbounded, UnboundedSender},
    SinkExt, StreamExt,
};
use gph_crypto_keys::PrivateKey;
use graphene_gateway::{
    chain::TESTNET_CHAIN_ID,
    codec::SUBSCRIPTION_TAG,
    connection::{ConnectionOptions, Connector, FrameSink, FrameStream, NodeConnection},
    error::{Error, Result},
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};

pub const PREFIX: &str = "TEST";

const DATABASE_API: u64 = 2;
const HISTORY_API: u64 = 3;
const BROADCAST_API: u64 = 4;

/// Head block used for reference block tests: number 0x1234ABCD, prefix bytes
/// `0xdeadbeef` little-endian at offset 4.
pub const HEAD_BLOCK_NUMBER: u32 = 0x1234_abcd;
pub const HEAD_BLOCK_ID: &str = "1234abcdefbeadde000000000000000000000000";

#[derive(Default)]
struct NodeState {
    chain_id: String,
    objects: HashMap<String, Value>,
    accounts: HashMap<String, Value>,
    assets: HashMap<String, Value>,
    balances: HashMap<String, Vec<Value>>,
    blocks: HashMap<u64, Value>,
    fees: HashMap<u64, i64>,
    errors: HashMap<String, Value>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
    broadcasts: Vec<Value>,
    sessions: usize,
    session: Option<UnboundedSender<Result<String>>>,
}

/// Scriptable node. Clones share state.
#[derive(Clone)]
pub struct MockNode {
    state: Arc<Mutex<NodeState>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        let node = Self {
            state: Arc::new(Mutex::new(NodeState {
                chain_id: TESTNET_CHAIN_ID.to_string(),
                ..NodeState::default()
            })),
        };
        node.insert_object(json!({
            "id": "2.0.0",
            "parameters": {"current_fees": {
                "parameters": [[0, {"fee": 20000, "price_per_kbyte": 10000}], [22, {"fee": 5000}]],
                "scale": 10000
            }}
        }));
        node.insert_object(json!({
            "id": "2.1.0",
            "head_block_number": HEAD_BLOCK_NUMBER,
            "head_block_id": HEAD_BLOCK_ID,
            "time": "2026-01-01T00:00:00"
        }));
        node.set_fee(0, 20000);
        node.set_fee(22, 5000);
        node
    }

    /// Serve a chain the gateway does not know.
    pub fn set_chain_id(&self, chain_id: &str) {
        self.state.lock().chain_id = chain_id.to_string();
    }

    /// Store an object under its `id`. Accounts are indexed by name and
    /// assets by symbol too.
    pub fn insert_object(&self, object: Value) {
        let mut state = self.state.lock();
        let id = object["id"].as_str().unwrap_or_default().to_string();
        if id.starts_with("1.2.") {
            if let Some(name) = object["name"].as_str() {
                state.accounts.insert(name.to_string(), object.clone());
            }
        }
        if id.starts_with("1.3.") {
            if let Some(symbol) = object["symbol"].as_str() {
                state.assets.insert(symbol.to_string(), object.clone());
            }
            state.assets.insert(id.clone(), object.clone());
        }
        state.objects.insert(id, object);
    }

    pub fn set_balances(&self, account_id: &str, balances: Vec<Value>) {
        self.state.lock().balances.insert(account_id.to_string(), balances);
    }

    pub fn insert_block(&self, num: u64, timestamp: &str) {
        self.state
            .lock()
            .blocks
            .insert(num, json!({"timestamp": timestamp, "witness": "1.6.1"}));
    }

    /// Fee `get_required_fees` reports for operation `tag`.
    pub fn set_fee(&self, tag: u64, amount: i64) {
        self.state.lock().fees.insert(tag, amount);
    }

    /// Answer `method` with `error` instead of a result.
    pub fn fail_method(&self, method: &str, error: Value) {
        self.state.lock().errors.insert(method.to_string(), error);
    }

    /// Hold back responses to `method`.
    pub fn delay_method(&self, method: &str, delay: Duration) {
        self.state.lock().delays.insert(method.to_string(), delay);
    }

    pub fn clear_delay(&self, method: &str) {
        self.state.lock().delays.remove(method);
    }

    /// Every method called so far, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|m| *m == method).count()
    }

    pub fn broadcasts(&self) -> Vec<Value> {
        self.state.lock().broadcasts.clone()
    }

    /// Handshakes started so far.
    pub fn sessions(&self) -> usize {
        self.state.lock().sessions
    }

    /// Push object fragments as one notice.
    pub fn notify(&self, fragments: Vec<Value>) {
        let notice = json!({"method": "notice", "params": [SUBSCRIPTION_TAG, [fragments]]});
        if let Some(session) = &self.state.lock().session {
            let _ = session.unbounded_send(Ok(notice.to_string()));
        }
    }

    /// Drop the live channel as a network failure would.
    pub fn kill_session(&self) {
        if let Some(session) = self.state.lock().session.take() {
            session.close_channel();
        }
    }

    /// A connection to this node with short timers.
    pub fn connect(&self) -> NodeConnection {
        NodeConnection::spawn(self.connector(), fast_options())
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector { node: self.clone() }
    }

    fn respond(&self, method: &str, args: &[Value]) -> std::result::Result<Value, Value> {
        let mut state = self.state.lock();
        state.calls.push(method.to_string());
        if let Some(error) = state.errors.get(method) {
            return Err(error.clone());
        }

        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        let result = match method {
            "login" => json!(true),
            "database" => json!(DATABASE_API),
            "history" => json!(HISTORY_API),
            "network_broadcast" => json!(BROADCAST_API),
            "set_subscribe_callback" => Value::Null,
            "get_chain_properties" => json!({"id": "2.11.0", "chain_id": state.chain_id}),
            "get_chain_id" => json!(state.chain_id),
            "echo" => arg(0),
            "get_objects" => json!(strings(&arg(0))
                .iter()
                .map(|id| state.objects.get(id).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>()),
            "get_account_by_name" => arg(0)
                .as_str()
                .and_then(|name| state.accounts.get(name).cloned())
                .unwrap_or(Value::Null),
            "lookup_asset_symbols" => json!(strings(&arg(0))
                .iter()
                .map(|key| state.assets.get(key).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>()),
            "get_required_fees" => {
                let asset = arg(1).as_str().unwrap_or("1.3.0").to_string();
                let ops = arg(0).as_array().cloned().unwrap_or_default();
                json!(ops.iter().map(|op| required_fee(&state.fees, op, &asset)).collect::<Vec<_>>())
            }
            "get_dynamic_global_properties" => state.objects.get("2.1.0").cloned().unwrap_or(Value::Null),
            "get_block" => arg(0)
                .as_u64()
                .and_then(|num| state.blocks.get(&num).cloned())
                .unwrap_or(Value::Null),
            "get_account_balances" => {
                let account = arg(0).as_str().unwrap_or_default().to_string();
                json!(state.balances.get(&account).cloned().unwrap_or_default())
            }
            "broadcast_transaction" => {
                state.broadcasts.push(arg(0));
                Value::Null
            }
            other => return Err(json!({"code": -32601, "message": format!("method {} not found", other)})),
        };
        Ok(result)
    }

    fn delay(&self, method: &str, args: &[Value]) -> Option<Duration> {
        if method == "echo" {
            return args.get(1).and_then(Value::as_u64).map(Duration::from_millis);
        }
        self.state.lock().delays.get(method).copied()
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// `[fee, [nested]]` for proposals, a plain amount otherwise.
fn required_fee(fees: &HashMap<u64, i64>, op: &Value, asset: &str) -> Value {
    let tag = op[0].as_u64().unwrap_or_default();
    let fee = json!({"amount": fees.get(&tag).copied().unwrap_or(0), "asset_id": asset});
    if tag == 22 {
        let nested: Vec<Value> = op[1]["proposed_ops"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|proposed| required_fee(fees, &proposed["op"], asset))
            .collect();
        json!([fee, nested])
    } else {
        fee
    }
}

pub struct MockConnector {
    node: MockNode,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (client_tx, mut server_rx) = unbounded::<String>();
        let (server_tx, client_rx) = unbounded::<Result<String>>();
        {
            let mut state = self.node.state.lock();
            state.sessions += 1;
            state.session = Some(server_tx.clone());
        }

        let node = self.node.clone();
        tokio::spawn(async move {
            while let Some(text) = server_rx.next().await {
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let id = request["id"].clone();
                let method = request["params"][1].as_str().unwrap_or_default().to_string();
                let args = request["params"][2].as_array().cloned().unwrap_or_default();

                let delay = node.delay(&method, &args);
                let node = node.clone();
                let reply = server_tx.clone();
                let answer = async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    let frame = match node.respond(&method, &args) {
                        Ok(result) => json!({"id": id, "jsonrpc": "2.0", "result": result}),
                        Err(error) => json!({"id": id, "jsonrpc": "2.0", "error": error}),
                    };
                    let _ = reply.unbounded_send(Ok(frame.to_string()));
                };
                if delay.is_some() {
                    tokio::spawn(answer);
                } else {
                    answer.await;
                }
            }
        });

        let sink: FrameSink = Box::pin(client_tx.sink_map_err(|_| Error::ConnectionClosed));
        let stream: FrameStream = Box::pin(client_rx);
        Ok((sink, stream))
    }
}

pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        keepalive_interval: Duration::from_secs(5),
        reconnect_delay: Duration::from_millis(50),
        ..ConnectionOptions::default()
    }
}

/// Account whose owner and active authorities are both `key` with weight 1.
pub fn account_json(id: &str, name: &str, key: &PrivateKey, memo: &PrivateKey) -> Value {
    let public = key.public_key().to_prefixed(PREFIX);
    let statistics = format!("2.6.{}", id.rsplit('.').next().unwrap_or("0"));
    json!({
        "id": id,
        "name": name,
        "owner": {"weight_threshold": 1, "account_auths": [], "key_auths": [[public, 1]], "address_auths": []},
        "active": {"weight_threshold": 1, "account_auths": [], "key_auths": [[public, 1]], "address_auths": []},
        "options": {"memo_key": memo.public_key().to_prefixed(PREFIX)},
        "statistics": statistics
    })
}

/// Asset whose core exchange rate is `base` asset units per `quote` core units.
pub fn asset_json(id: &str, symbol: &str, precision: u8, base: i64, quote: i64) -> Value {
    json!({
        "id": id,
        "symbol": symbol,
        "precision": precision,
        "options": {"core_exchange_rate": {
            "base": {"amount": base, "asset_id": id},
            "quote": {"amount": quote, "asset_id": "1.3.0"}
        }}
    })
}

/// Wait until `check` holds, polling for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
