//! Configuration for the gateway.

use crate::{
    chain::{ChainParams, KnownChains},
    connection::ConnectionOptions,
};
use gph_crypto_keys::PrivateKey;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// An additional chain the gateway may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    pub prefix: String,
    pub core_symbol: String,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Node WebSocket endpoint
    #[serde(default = "default_node_url")]
    pub node_url: String,

    /// Operating account name
    pub account: String,

    /// Active private key (WIF), required for transfers
    pub active_key: Option<String>,

    /// Memo private key (WIF), required to encrypt and decrypt memos
    pub memo_key: Option<String>,

    /// JSON-RPC listen address
    #[serde(default = "default_rpc_listen")]
    pub rpc_listen: SocketAddr,

    /// Send worker count
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Transfer records are POSTed here when set
    pub webhook_url: Option<String>,

    /// File holding the activity cursor
    #[serde(default = "default_cursor_file")]
    pub cursor_file: PathBuf,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Transaction expiration
    #[serde(default = "default_expiration")]
    pub expiration_secs: u64,

    /// Replay the whole account history when no cursor is persisted
    #[serde(default)]
    pub replay_history: bool,

    /// Chains accepted in addition to the built-in ones
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

fn default_node_url() -> String {
    "wss://ws.gdex.top".to_string()
}

fn default_rpc_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 18080))
}

fn default_workers() -> usize {
    10
}

fn default_cursor_file() -> PathBuf {
    PathBuf::from("gateway_cursor.json")
}

fn default_keepalive() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_expiration() -> u64 {
    600
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_url: default_node_url(),
            account: String::new(),
            active_key: None,
            memo_key: None,
            rpc_listen: default_rpc_listen(),
            workers: default_workers(),
            webhook_url: None,
            cursor_file: default_cursor_file(),
            keepalive_secs: default_keepalive(),
            reconnect_delay_secs: default_reconnect_delay(),
            expiration_secs: default_expiration(),
            replay_history: false,
            chains: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.node_url.starts_with("ws://") || self.node_url.starts_with("wss://")) {
            anyhow::bail!("node_url must start with ws:// or wss://, got {}", self.node_url);
        }

        if self.account.is_empty() {
            anyhow::bail!("account must be set");
        }

        if let Some(key) = &self.active_key {
            PrivateKey::from_wif(key).map_err(|e| anyhow::anyhow!("active_key is invalid: {}", e))?;
        } else {
            tracing::warn!("No active_key configured, transfers will fail");
        }
        if let Some(key) = &self.memo_key {
            PrivateKey::from_wif(key).map_err(|e| anyhow::anyhow!("memo_key is invalid: {}", e))?;
        }

        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.keepalive_secs == 0 {
            anyhow::bail!("keepalive_secs must be at least 1");
        }
        if self.expiration_secs == 0 {
            anyhow::bail!("expiration_secs must be at least 1");
        }

        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("webhook_url must be an http(s) URL, got {}", url);
            }
        }

        for chain in &self.chains {
            if chain.chain_id.len() != 64 || hex::decode(&chain.chain_id).is_err() {
                anyhow::bail!("chain_id {} must be 64 hex characters", chain.chain_id);
            }
            if chain.prefix.is_empty() {
                anyhow::bail!("chain {} has an empty prefix", chain.chain_id);
            }
        }

        Ok(())
    }

    pub fn known_chains(&self) -> KnownChains {
        KnownChains::with_extra(
            self.chains
                .iter()
                .map(|c| ChainParams::new(&c.chain_id, &c.prefix, &c.core_symbol)),
        )
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            known_chains: self.known_chains(),
            ..ConnectionOptions::default()
        }
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn active_private_key(&self) -> anyhow::Result<Option<PrivateKey>> {
        parse_key(self.active_key.as_deref())
    }

    pub fn memo_private_key(&self) -> anyhow::Result<Option<PrivateKey>> {
        parse_key(self.memo_key.as_deref())
    }
}

fn parse_key(wif: Option<&str>) -> anyhow::Result<Option<PrivateKey>> {
    wif.map(|w| PrivateKey::from_wif(w).map_err(anyhow::Error::from))
        .transpose()
}
