//! Asset info cache.
//!
//! Asset ids, symbols and precisions are chain constants, so entries are
//! kept for the lifetime of the cache and indexed by both id and symbol.

use crate::{
    error::{Error, Result},
    node_api::NodeApi,
    objects::{is_object_id, AssetInfo},
};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

pub struct AssetCache {
    node: NodeApi,
    assets: RwLock<HashMap<String, Arc<AssetInfo>>>,
}

impl AssetCache {
    pub fn new(node: NodeApi) -> Self {
        Self {
            node,
            assets: RwLock::new(HashMap::new()),
        }
    }

    pub fn cached(&self, symbol_or_id: &str) -> Option<Arc<AssetInfo>> {
        self.assets.read().get(symbol_or_id).cloned()
    }

    pub fn insert(&self, info: AssetInfo) -> Arc<AssetInfo> {
        let info = Arc::new(info);
        let mut assets = self.assets.write();
        assets.insert(info.id.clone(), info.clone());
        assets.insert(info.symbol.clone(), info.clone());
        info
    }

    /// Asset by id (`1.3.x`) or symbol.
    pub async fn get(&self, symbol_or_id: &str) -> Result<Arc<AssetInfo>> {
        if let Some(info) = self.cached(symbol_or_id) {
            return Ok(info);
        }

        let info = if is_object_id(symbol_or_id) {
            self.node.get_object::<AssetInfo>(symbol_or_id).await?
        } else {
            self.node
                .lookup_asset_symbols(&[symbol_or_id])
                .await?
                .into_iter()
                .next()
                .flatten()
        };
        let info = info.ok_or_else(|| Error::Rpc(format!("unknown asset {}", symbol_or_id)))?;
        debug!("Cached asset {} ({})", info.symbol, info.id);
        Ok(self.insert(info))
    }

    /// Several assets at once, in request order, with one node round trip
    /// for everything not cached yet.
    pub async fn get_many(&self, symbols_or_ids: &[String]) -> Result<Vec<Arc<AssetInfo>>> {
        let missing: Vec<&str> = symbols_or_ids
            .iter()
            .map(String::as_str)
            .filter(|key| self.cached(key).is_none())
            .collect();

        if !missing.is_empty() {
            let found = self.node.lookup_asset_symbols(&missing).await?;
            for (key, info) in missing.iter().zip(found) {
                match info {
                    Some(info) => {
                        self.insert(info);
                    }
                    None => return Err(Error::Rpc(format!("unknown asset {}", key))),
                }
            }
        }

        symbols_or_ids
            .iter()
            .map(|key| {
                self.cached(key)
                    .ok_or_else(|| Error::Rpc(format!("unknown asset {}", key)))
            })
            .collect()
    }
}
