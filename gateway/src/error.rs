//! Gateway error taxonomy.

use std::result::Result as StdResult;

/// A convenience wrapper for a [std::result::Result] carrying a gateway [Error].
pub type Result<T> = StdResult<T, Error>;

/// Why no usable signing key set could be assembled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissingKey {
    /// None of the locally held keys appear anywhere in the authority graph.
    #[error("no local key can sign for {account}")]
    NoUsableKeys { account: String },

    /// Some keys were found but their weights stay below the threshold.
    #[error("keys for {account} reach weight {found} of {required}")]
    InsufficientWeight {
        account: String,
        found: u64,
        required: u64,
    },

    /// The threshold was not reached and the walk stopped at the delegation depth cap.
    #[error("authority of {account} is delegated deeper than the resolver follows")]
    DepthExceeded { account: String },

    /// A memo was requested but no memo key is configured.
    #[error("memo key for {account} is not configured")]
    MemoKey { account: String },
}

/// Errors raised by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel to the node failed or could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// The channel closed while the call was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The node serves a chain this gateway does not know. Fatal.
    #[error("node serves unknown chain {0}")]
    UnknownChain(String),

    /// The node rejected a call.
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("missing key: {0}")]
    MissingKey(#[from] MissingKey),

    #[error("memo decode failed: {0}")]
    MemoDecode(#[from] gph_crypto_memo::Error),

    /// Rejected before anything was sent to the node.
    #[error("validation error: {0}")]
    Validation(String),

    /// The send worker pool no longer accepts or completes jobs.
    #[error("send pool is closed")]
    PoolClosed,

    /// The node answered with a payload of an unexpected shape.
    #[error("malformed node payload: {0}")]
    Decode(String),

    #[error("key error: {0}")]
    Key(#[from] gph_crypto_keys::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same request on a fresh connection may succeed.
    pub fn should_retry(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::ConnectionClosed)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode(message.into())
    }
}
