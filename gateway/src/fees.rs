//! Transfer fee estimation.
//!
//! The chain charges fees in the core asset. For display, the core fee is
//! converted into another asset through that asset's core exchange rate:
//!
//! ```text
//! fee = round2(base × (flat + per_kbyte) / quote × scale / 10⁴ / 10^precision)
//! ```
//!
//! The fee schedule is read once per calculator and never refreshed, and
//! converted quotes are cached per asset. A changed schedule is picked up on
//! restart; the node rounds the actual fee at submission time anyway.

use crate::{
    assets::AssetCache,
    error::{Error, Result},
    node_api::NodeApi,
    objects::{AssetInfo, FeeSchedule},
    transaction::TRANSFER_OPERATION,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::OnceCell;
use tracing::debug;

/// Fee parameters of the transfer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFeeParams {
    pub fee: u64,
    pub price_per_kbyte: u64,
    pub scale: u32,
}

impl TransferFeeParams {
    /// Extract the transfer entry from the current fee schedule.
    pub fn from_schedule(schedule: &FeeSchedule) -> Result<Self> {
        let (_, parameters) = schedule
            .parameters
            .iter()
            .find(|(tag, _)| *tag == TRANSFER_OPERATION)
            .ok_or_else(|| Error::decode("fee schedule has no transfer entry"))?;

        Ok(Self {
            fee: read_u64(parameters, "fee")?,
            price_per_kbyte: parameters
                .get("price_per_kbyte")
                .map(|_| read_u64(parameters, "price_per_kbyte"))
                .transpose()?
                .unwrap_or(0),
            scale: schedule.scale,
        })
    }
}

fn read_u64(parameters: &Value, field: &str) -> Result<u64> {
    match parameters.get(field) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::decode(format!("transfer fee parameter {} missing", field)))
}

/// A display fee for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub asset_id: String,
    pub symbol: String,
    pub fee: f64,
}

/// Convert the core transfer fee into `asset` units, rounded to two decimals.
pub fn display_fee(params: &TransferFeeParams, asset: &AssetInfo) -> Result<f64> {
    let rate = &asset.options.core_exchange_rate;
    if rate.quote.amount == 0 {
        return Err(Error::decode(format!(
            "asset {} has a zero core exchange rate quote",
            asset.symbol
        )));
    }

    let core_fee = (params.fee + params.price_per_kbyte) as f64;
    let total = rate.base.amount as f64 * core_fee / rate.quote.amount as f64;
    let total = total * f64::from(params.scale) / 1e4 / 10f64.powi(i32::from(asset.precision));
    Ok(round2(total))
}

/// Two-decimal rounding with ties going to the even cent.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

pub struct FeeCalculator {
    node: NodeApi,
    assets: Arc<AssetCache>,
    params: OnceCell<TransferFeeParams>,
    quotes: Mutex<HashMap<String, FeeQuote>>,
}

impl FeeCalculator {
    pub fn new(node: NodeApi, assets: Arc<AssetCache>) -> Self {
        Self {
            node,
            assets,
            params: OnceCell::new(),
            quotes: Mutex::new(HashMap::new()),
        }
    }

    async fn params(&self) -> Result<TransferFeeParams> {
        self.params
            .get_or_try_init(|| async {
                let properties = self.node.get_global_properties().await?;
                let params = TransferFeeParams::from_schedule(&properties.parameters.current_fees)?;
                debug!("Loaded transfer fee parameters: {:?}", params);
                Ok::<_, Error>(params)
            })
            .await
            .copied()
    }

    /// Display transfer fee in the asset given by id or symbol.
    pub async fn transfer_fee(&self, symbol_or_id: &str) -> Result<FeeQuote> {
        if let Some(quote) = self.quotes.lock().get(symbol_or_id) {
            return Ok(quote.clone());
        }

        let params = self.params().await?;
        let asset = self.assets.get(symbol_or_id).await?;
        let quote = FeeQuote {
            asset_id: asset.id.clone(),
            symbol: asset.symbol.clone(),
            fee: display_fee(&params, &asset)?,
        };

        let mut quotes = self.quotes.lock();
        quotes.insert(asset.id.clone(), quote.clone());
        quotes.insert(asset.symbol.clone(), quote.clone());
        Ok(quote)
    }

    /// One quote per requested asset, in request order.
    pub async fn transfer_fees(&self, symbols_or_ids: &[String]) -> Result<Vec<FeeQuote>> {
        // Warm the asset cache with a single lookup.
        self.assets.get_many(symbols_or_ids).await?;

        let mut quotes = Vec::with_capacity(symbols_or_ids.len());
        for key in symbols_or_ids {
            quotes.push(self.transfer_fee(key).await?);
        }
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{AssetAmount, AssetOptions, Price};
    use serde_json::json;

    fn asset(precision: u8, base: i64, quote: i64) -> AssetInfo {
        AssetInfo {
            id: "1.3.121".into(),
            symbol: "USD".into(),
            precision,
            options: AssetOptions {
                core_exchange_rate: Price {
                    base: AssetAmount::new(base, "1.3.121"),
                    quote: AssetAmount::new(quote, "1.3.0"),
                },
            },
        }
    }

    #[test]
    fn test_display_fee_formula() {
        let params = TransferFeeParams {
            fee: 100,
            price_per_kbyte: 0,
            scale: 10_000,
        };
        // 100 × 100 / 1 × 10000 / 1e4 / 10² = 100
        assert_eq!(display_fee(&params, &asset(2, 100, 1)).unwrap(), 100.0);
        // Idempotent.
        assert_eq!(display_fee(&params, &asset(2, 100, 1)).unwrap(), 100.0);
    }

    #[test]
    fn test_round2_ties_to_even() {
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(0.3), 0.3);
        assert_eq!(round2(2.0 / 3.0), 0.67);
    }

    #[test]
    fn test_display_fee_rounds_to_cents() {
        let params = TransferFeeParams {
            fee: 86_869,
            price_per_kbyte: 0,
            scale: 10_000,
        };
        // 1 × 86869 / 3 / 10⁵ = 0.28956.. -> 0.29
        assert_eq!(display_fee(&params, &asset(5, 1, 3)).unwrap(), 0.29);
    }

    #[test]
    fn test_display_fee_includes_kbyte_price_and_scale() {
        let params = TransferFeeParams {
            fee: 100,
            price_per_kbyte: 50,
            scale: 20_000,
        };
        // 2 × 150 / 1 × 2 / 10² = 6
        assert_eq!(display_fee(&params, &asset(2, 2, 1)).unwrap(), 6.0);
    }

    #[test]
    fn test_display_fee_zero_quote() {
        let params = TransferFeeParams {
            fee: 1,
            price_per_kbyte: 0,
            scale: 10_000,
        };
        assert!(display_fee(&params, &asset(2, 1, 0)).is_err());
    }

    #[test]
    fn test_params_from_schedule() {
        let schedule: FeeSchedule = serde_json::from_value(json!({
            "parameters": [
                [0, {"fee": 86869, "price_per_kbyte": "955555"}],
                [1, {"fee": 500000}]
            ],
            "scale": 10000
        }))
        .unwrap();

        assert_eq!(
            TransferFeeParams::from_schedule(&schedule).unwrap(),
            TransferFeeParams {
                fee: 86_869,
                price_per_kbyte: 955_555,
                scale: 10_000
            }
        );
    }

    #[test]
    fn test_params_without_transfer_entry() {
        let schedule = FeeSchedule {
            parameters: vec![(1, json!({"fee": 5}))],
            scale: 10_000,
        };
        assert!(TransferFeeParams::from_schedule(&schedule).is_err());
    }
}
