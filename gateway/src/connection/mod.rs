//! Persistent node connection.
//!
//! One [`NodeConnection`] owns at most one live channel to a node. A
//! supervisor task opens the channel, runs the login handshake, keeps the
//! channel alive with periodic probes and reopens it after any read or write
//! failure. Callers share the channel through [`NodeConnection::call`]:
//! every request carries a fresh numeric id and resolves when the response
//! with the same id arrives, so any number of calls may be in flight and
//! complete out of order.
//!
//! Node-pushed object updates are routed by id prefix to callbacks
//! registered with [`NodeConnection::subscribe`]. Callbacks run on the
//! connection's single dispatch path and must return quickly.

mod websocket;

pub use websocket::WsConnector;

use crate::{
    chain::{ChainParams, KnownChains},
    codec::{self, Incoming, SUBSCRIPTION_TAG},
    error::{Error, Result},
};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Outbound half of a channel: whole text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a channel: whole text frames, ending when the channel closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens duplex text channels to a node.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;
}

/// Callback invoked with each pushed object fragment.
pub type NoticeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Subscription key receiving fragments that carry no object id.
pub const REMOVED_KEY: &str = "removed";

/// Fixed id of the login API.
const LOGIN_API: u64 = 1;

/// API namespace targeted by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    Login,
    Database,
    History,
    NetworkBroadcast,
}

#[derive(Debug, Clone, Copy)]
struct ApiIds {
    database: u64,
    history: u64,
    network_broadcast: u64,
}

/// Lifecycle of the connection as seen by collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// Handshake complete. `generation` increases with every successful handshake.
    Ready { generation: u64 },
    Disconnected,
    /// Stopped for good, e.g. the node serves an unknown chain.
    Failed(String),
    Closed,
}

/// Tunables for a [`NodeConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Interval between keep-alive probes, also the deadline for each probe.
    pub keepalive_interval: Duration,

    /// Pause between reconnect attempts.
    pub reconnect_delay: Duration,

    pub known_chains: KnownChains,

    /// Capacity of the queue between the channel reader and the dispatcher.
    pub inbound_queue: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
            known_chains: KnownChains::default(),
            inbound_queue: 64,
        }
    }
}

#[derive(Clone)]
struct Subscription {
    prefix: String,
    callbacks: Vec<NoticeCallback>,
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

struct Inner {
    connector: Box<dyn Connector>,
    options: ConnectionOptions,
    next_id: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<PendingMap>,
    subscriptions: RwLock<Vec<Subscription>>,
    api_ids: RwLock<Option<ApiIds>>,
    chain: RwLock<Option<ChainParams>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a supervised node connection. Cheap to clone.
#[derive(Clone)]
pub struct NodeConnection {
    inner: Arc<Inner>,
}

impl NodeConnection {
    /// Start the supervisor task and return immediately.
    pub fn spawn(connector: impl Connector, options: ConnectionOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            connector: Box::new(connector),
            options,
            next_id: AtomicU64::new(1),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            api_ids: RwLock::new(None),
            chain: RwLock::new(None),
            generation: AtomicU64::new(0),
            state,
            shutdown,
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(inner.clone(), shutdown_rx));
        *inner.supervisor.lock() = Some(handle);
        Self { inner }
    }

    /// Connect to a `ws://` or `wss://` endpoint.
    pub fn connect_url(url: &str, options: ConnectionOptions) -> Self {
        Self::spawn(WsConnector::new(url), options)
    }

    /// Issue one call and wait for its response.
    ///
    /// Fails with [`Error::ConnectionClosed`] if the channel goes away first.
    /// Dropping the returned future abandons the call without disturbing
    /// other in-flight calls.
    pub async fn call(&self, api: Api, method: &str, args: Vec<Value>) -> Result<Value> {
        self.inner.call(api, method, &args).await
    }

    /// Register `callback` for pushed fragments whose id starts with `prefix`.
    ///
    /// Use [`REMOVED_KEY`] to receive fragments without an id. Registrations
    /// survive reconnects; the node-side subscription does not, so resuming
    /// collaborators re-fetch the objects they watch after each new
    /// [`ConnectionState::Ready`].
    pub fn subscribe<F>(&self, prefix: impl Into<String>, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let prefix = prefix.into();
        let mut subscriptions = self.inner.subscriptions.write();
        match subscriptions.iter_mut().find(|s| s.prefix == prefix) {
            Some(subscription) => subscription.callbacks.push(Arc::new(callback)),
            None => subscriptions.push(Subscription {
                prefix,
                callbacks: vec![Arc::new(callback)],
            }),
        }
    }

    /// Wait until the handshake completes. Returns `false` once the
    /// connection has failed permanently or was closed.
    pub async fn wait_until_ready(&self) -> bool {
        let mut states = self.inner.state.subscribe();
        loop {
            match &*states.borrow_and_update() {
                ConnectionState::Ready { .. } => return true,
                ConnectionState::Failed(_) | ConnectionState::Closed => return false,
                _ => {}
            }
            if states.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Watch lifecycle transitions.
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Chain parameters, known after the first successful handshake.
    pub fn chain_params(&self) -> Option<ChainParams> {
        self.inner.chain.read().clone()
    }

    /// Stop the supervisor, fail pending calls and close the channel.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Connection supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Inner {
    async fn call(&self, api: Api, method: &str, args: &[Value]) -> Result<Value> {
        let api_id = match api {
            Api::Login => LOGIN_API,
            _ => {
                let ids = (*self.api_ids.read())
                    .ok_or_else(|| Error::Connection("node APIs are not registered".into()))?;
                match api {
                    Api::History => ids.history,
                    Api::NetworkBroadcast => ids.network_broadcast,
                    _ => ids.database,
                }
            }
        };
        self.call_raw(api_id, method, args).await
    }

    async fn call_raw(&self, api_id: u64, method: &str, args: &[Value]) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = codec::encode_call(id, api_id, method, args)?;
        let (tx, rx) = oneshot::channel();

        {
            let outbound = self.outbound.lock();
            let sender = outbound.as_ref().ok_or(Error::ConnectionClosed)?;
            self.pending.lock().insert(id, tx);
            if sender.send(payload).is_err() {
                self.pending.lock().remove(&id);
                return Err(Error::ConnectionClosed);
            }
        }
        debug!("-> #{} {}", id, method);

        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    async fn handshake(&self) -> Result<ChainParams> {
        self.call_raw(LOGIN_API, "login", &[json!(""), json!("")])
            .await?;
        let database = self.register_api("database").await?;
        let history = self.register_api("history").await?;
        let network_broadcast = self.register_api("network_broadcast").await?;

        self.call_raw(
            database,
            "set_subscribe_callback",
            &[json!(SUBSCRIPTION_TAG), json!(false)],
        )
        .await?;

        let properties = self.call_raw(database, "get_chain_properties", &[]).await?;
        let chain_id = properties
            .get("chain_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::decode("chain properties without chain_id"))?;
        let chain = self
            .options
            .known_chains
            .find(chain_id)
            .cloned()
            .ok_or_else(|| Error::UnknownChain(chain_id.to_string()))?;

        {
            let mut current = self.chain.write();
            match current.as_ref() {
                Some(existing) if existing.chain_id != chain.chain_id => {
                    return Err(Error::UnknownChain(chain.chain_id));
                }
                Some(_) => {}
                None => *current = Some(chain.clone()),
            }
        }

        *self.api_ids.write() = Some(ApiIds {
            database,
            history,
            network_broadcast,
        });
        Ok(chain)
    }

    async fn register_api(&self, name: &str) -> Result<u64> {
        self.call_raw(LOGIN_API, name, &[])
            .await?
            .as_u64()
            .ok_or_else(|| Error::decode(format!("{} api id is not a number", name)))
    }

    fn resolve(&self, id: u64, outcome: std::result::Result<Value, String>) {
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome.map_err(Error::Rpc));
            }
            None => debug!("Dropping response for unknown request #{}", id),
        }
    }

    fn notify(&self, fragments: &[Value]) {
        let subscriptions = self.subscriptions.read().clone();
        for fragment in fragments {
            let id = codec::fragment_id(fragment);
            for subscription in &subscriptions {
                let matches = match id {
                    Some(id) => id.starts_with(&subscription.prefix),
                    None => subscription.prefix == REMOVED_KEY,
                };
                if matches {
                    for callback in &subscription.callbacks {
                        callback(fragment);
                    }
                }
            }
        }
    }

    /// Drop the channel, forget API ids and fail every pending call.
    fn teardown(&self) {
        self.outbound.lock().take();
        *self.api_ids.write() = None;

        let drained: Vec<_> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!("Failing {} pending calls", drained.len());
        }
        for tx in drained {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
    }
}

/// Removes an abandoned call from the pending map.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

enum SessionEnd {
    Lost(Error),
    Fatal(Error),
    Shutdown,
}

async fn supervise(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        inner.state.send_replace(ConnectionState::Connecting);

        let end = tokio::select! {
            connected = inner.connector.connect() => match connected {
                Ok((sink, stream)) => run_session(&inner, sink, stream, &mut shutdown).await,
                Err(e) => SessionEnd::Lost(e),
            },
            _ = shutdown_requested(&mut shutdown) => SessionEnd::Shutdown,
        };
        inner.teardown();

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Fatal(e) => {
                error!("Node connection stopped: {}", e);
                inner.state.send_replace(ConnectionState::Failed(e.to_string()));
                return;
            }
            SessionEnd::Lost(e) => {
                warn!(
                    "Node connection lost: {}; reconnecting in {:?}",
                    e, inner.options.reconnect_delay
                );
                inner.state.send_replace(ConnectionState::Disconnected);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.options.reconnect_delay) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }

    inner.teardown();
    inner.state.send_replace(ConnectionState::Closed);
    info!("Node connection closed");
}

async fn run_session(
    inner: &Arc<Inner>,
    sink: FrameSink,
    stream: FrameStream,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (queue_tx, queue_rx) = mpsc::channel(inner.options.inbound_queue.max(1));
    *inner.outbound.lock() = Some(out_tx);

    let mut writer = tokio::spawn(write_frames(sink, out_rx));
    let mut reader = tokio::spawn(read_frames(stream, queue_tx));
    let dispatcher = tokio::spawn(dispatch_frames(inner.clone(), queue_rx));

    let end = tokio::select! {
        end = session_body(inner) => end,
        ended = &mut reader => SessionEnd::Lost(task_error("read", ended)),
        ended = &mut writer => SessionEnd::Lost(task_error("write", ended)),
        _ = shutdown_requested(shutdown) => SessionEnd::Shutdown,
    };

    reader.abort();
    writer.abort();
    dispatcher.abort();
    end
}

/// Handshake, then probe the node until a probe fails.
async fn session_body(inner: &Inner) -> SessionEnd {
    let chain = match inner.handshake().await {
        Ok(chain) => chain,
        Err(e @ Error::UnknownChain(_)) => return SessionEnd::Fatal(e),
        Err(e) => return SessionEnd::Lost(e),
    };

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    info!(
        "Connected to chain {} ({}), generation {}",
        chain.chain_id, chain.prefix, generation
    );
    inner
        .state
        .send_replace(ConnectionState::Ready { generation });

    let interval = inner.options.keepalive_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let probe = inner.call(Api::Database, "get_chain_id", &[]);
        match tokio::time::timeout(interval, probe).await {
            Ok(Ok(_)) => debug!("Keep-alive ok"),
            Ok(Err(e)) if e.should_retry() => return SessionEnd::Lost(e),
            Ok(Err(e)) => warn!("Keep-alive probe rejected: {}", e),
            Err(_) => return SessionEnd::Lost(Error::Connection("keep-alive timed out".into())),
        }
    }
}

async fn read_frames(mut stream: FrameStream, queue: mpsc::Sender<String>) -> Error {
    loop {
        match stream.next().await {
            Some(Ok(text)) => {
                if queue.send(text).await.is_err() {
                    return Error::ConnectionClosed;
                }
            }
            Some(Err(e)) => return e,
            None => return Error::Connection("channel closed by node".into()),
        }
    }
}

async fn write_frames(mut sink: FrameSink, mut outbound: mpsc::UnboundedReceiver<String>) -> Error {
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sink.send(text).await {
            return e;
        }
    }
    let _ = sink.close().await;
    Error::ConnectionClosed
}

/// Decode frames strictly in arrival order.
async fn dispatch_frames(inner: Arc<Inner>, mut queue: mpsc::Receiver<String>) {
    while let Some(text) = queue.recv().await {
        match codec::decode(&text) {
            Ok(Incoming::Response { id, outcome }) => inner.resolve(id, outcome),
            Ok(Incoming::Notice { fragments, .. }) => inner.notify(&fragments),
            Ok(Incoming::Other) => debug!("Ignoring frame: {}", text),
            Err(e) => warn!("Dropping undecodable frame: {}", e),
        }
    }
}

fn task_error(side: &str, ended: std::result::Result<Error, tokio::task::JoinError>) -> Error {
    match ended {
        Ok(e) => e,
        Err(e) => Error::Connection(format!("{} task failed: {}", side, e)),
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
