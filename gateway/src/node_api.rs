//! Typed node API.
//!
//! Thin wrappers over [`NodeConnection::call`] that fix the API namespace
//! and the shape of the result for every node method the gateway uses.

use crate::{
    chain::ChainParams,
    connection::{Api, NodeConnection},
    error::{Error, Result},
    objects::{
        Account, AssetAmount, AssetInfo, BlockHeader, DynamicGlobalProperties, GlobalProperties,
    },
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

/// Id of the global properties object.
pub const GLOBAL_PROPERTIES_ID: &str = "2.0.0";

#[derive(Clone)]
pub struct NodeApi {
    connection: NodeConnection,
}

impl NodeApi {
    pub fn new(connection: NodeConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &NodeConnection {
        &self.connection
    }

    /// Chain parameters of the connected node.
    pub fn chain_params(&self) -> Result<ChainParams> {
        self.connection
            .chain_params()
            .ok_or_else(|| Error::Connection("handshake has not completed".into()))
    }

    async fn call<T: DeserializeOwned>(&self, api: Api, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.connection.call(api, method, args).await?;
        serde_json::from_value(value).map_err(|e| Error::decode(format!("{}: {}", method, e)))
    }

    /// Raw objects by id, `null` for unknown ids.
    pub async fn get_objects(&self, ids: &[&str]) -> Result<Vec<Value>> {
        self.call(Api::Database, "get_objects", vec![json!(ids)]).await
    }

    /// One object by id, `None` if the node does not know it.
    pub async fn get_object<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let mut objects = self.get_objects(&[id]).await?;
        match objects.pop() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::decode(format!("object {}: {}", id, e))),
        }
    }

    pub async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        self.call(Api::Database, "get_account_by_name", vec![json!(name)])
            .await
    }

    /// Account by id (`1.2.x`) or by name.
    pub async fn get_account(&self, id_or_name: &str) -> Result<Account> {
        let account = if crate::objects::is_object_id(id_or_name) {
            self.get_object(id_or_name).await?
        } else {
            self.get_account_by_name(id_or_name).await?
        };
        account.ok_or_else(|| Error::Rpc(format!("unknown account {}", id_or_name)))
    }

    pub async fn lookup_asset_symbols(&self, symbols_or_ids: &[&str]) -> Result<Vec<Option<AssetInfo>>> {
        self.call(Api::Database, "lookup_asset_symbols", vec![json!(symbols_or_ids)])
            .await
    }

    /// One fee entry per operation: an amount object, or `[fee, [nested fees]]`
    /// for operations that carry proposed operations.
    pub async fn get_required_fees(&self, operations: &[Value], asset_id: &str) -> Result<Vec<Value>> {
        self.call(
            Api::Database,
            "get_required_fees",
            vec![json!(operations), json!(asset_id)],
        )
        .await
    }

    pub async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties> {
        self.call(Api::Database, "get_dynamic_global_properties", Vec::new())
            .await
    }

    pub async fn get_global_properties(&self) -> Result<GlobalProperties> {
        self.get_object(GLOBAL_PROPERTIES_ID)
            .await?
            .ok_or_else(|| Error::decode("global properties object missing"))
    }

    pub async fn get_block(&self, block_num: u64) -> Result<Option<BlockHeader>> {
        self.call(Api::Database, "get_block", vec![json!(block_num)])
            .await
    }

    /// Balances of `account_id`; an empty `asset_ids` means all assets.
    pub async fn get_account_balances(&self, account_id: &str, asset_ids: &[&str]) -> Result<Vec<AssetAmount>> {
        self.call(
            Api::Database,
            "get_account_balances",
            vec![json!(account_id), json!(asset_ids)],
        )
        .await
    }

    pub async fn broadcast_transaction(&self, transaction: &Value) -> Result<Value> {
        debug!("Broadcasting transaction");
        self.connection
            .call(Api::NetworkBroadcast, "broadcast_transaction", vec![transaction.clone()])
            .await
    }
}
