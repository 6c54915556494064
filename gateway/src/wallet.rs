//! Account operations exposed by the gateway: balances, fees and transfers.

use crate::{
    amount::parse_amount,
    assets::AssetCache,
    authority::{AuthorityResolver, Permission},
    error::{MissingKey, Result},
    fees::{FeeCalculator, FeeQuote},
    node_api::NodeApi,
    objects::{Account, AssetAmount},
    send_pool::TransferExecutor,
    tracker::AssetValue,
    transaction::{Memo, SignedTransaction, TransactionBuilder, TransferOperation},
};
use async_trait::async_trait;
use gph_crypto_keys::{PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// A transfer requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Recipient name or id.
    pub to: String,
    /// Asset symbol or id.
    pub asset: String,
    /// Decimal amount in asset units.
    pub amount: String,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Acknowledgment of a submitted transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_id: String,
    pub from: String,
    pub to: String,
    pub amount: AssetValue,
    pub fee: AssetValue,
    pub transaction: SignedTransaction,
}

pub struct Wallet {
    node: NodeApi,
    assets: Arc<AssetCache>,
    fees: FeeCalculator,
    resolver: Arc<AuthorityResolver>,
    memo_key: Option<PrivateKey>,
    account: String,
    expiration: Duration,
}

impl Wallet {
    /// `account` is the name or id transfers are sent from.
    pub fn new(
        node: NodeApi,
        assets: Arc<AssetCache>,
        resolver: Arc<AuthorityResolver>,
        memo_key: Option<PrivateKey>,
        account: impl Into<String>,
        expiration: Duration,
    ) -> Self {
        Self {
            fees: FeeCalculator::new(node.clone(), assets.clone()),
            node,
            assets,
            resolver,
            memo_key,
            account: account.into(),
            expiration,
        }
    }

    /// The operating account, freshly fetched.
    pub async fn account(&self) -> Result<Account> {
        self.node.get_account(&self.account).await
    }

    /// All non-zero balances of the operating account.
    pub async fn get_balances(&self) -> Result<Vec<AssetValue>> {
        let account = self.account().await?;
        let balances = self.node.get_account_balances(&account.id, &[]).await?;
        let ids: Vec<String> = balances.iter().map(|b| b.asset_id.clone()).collect();
        let assets = self.assets.get_many(&ids).await?;

        Ok(balances
            .iter()
            .zip(assets)
            .filter(|(balance, _)| balance.amount != 0)
            .map(|(balance, asset)| AssetValue::new(balance.amount, &asset))
            .collect())
    }

    /// Display transfer fee per requested asset.
    pub async fn transfer_fees(&self, symbols_or_ids: &[String]) -> Result<Vec<FeeQuote>> {
        self.fees.transfer_fees(symbols_or_ids).await
    }

    /// Build, sign and broadcast a transfer. The fee is paid in the
    /// transferred asset.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        let from = self.account().await?;
        let to = self.node.get_account(&request.to).await?;
        let asset = self.assets.get(&request.asset).await?;
        let amount = parse_amount(&request.amount, asset.precision)?;

        let memo = match request.memo.as_deref() {
            Some(text) if !text.is_empty() => Some(self.encrypt_memo(&from, &to, text)?),
            _ => None,
        };

        let op = TransferOperation {
            fee: AssetAmount::new(0, asset.id.clone()),
            from: from.id.clone(),
            to: to.id.clone(),
            amount: AssetAmount::new(amount, asset.id.clone()),
            memo,
            extensions: Vec::new(),
        };

        let mut builder = TransactionBuilder::new(self.node.clone(), self.resolver.clone());
        builder.append_ops([op.into()])?;
        builder.add_signer(&from, Permission::Active)?;
        builder.build(&asset.id, self.expiration).await?;
        let receipt = builder.broadcast().await?;

        let fee = receipt
            .transaction
            .transaction
            .operations
            .first()
            .map(|op| op.fee().amount)
            .unwrap_or_default();
        info!(
            "Transferred {} {} to {} in {}",
            request.amount, asset.symbol, to.name, receipt.tx_id
        );

        Ok(TransferReceipt {
            tx_id: receipt.tx_id,
            from: from.name,
            to: to.name,
            amount: AssetValue::new(amount, &asset),
            fee: AssetValue::new(fee, &asset),
            transaction: receipt.transaction,
        })
    }

    fn encrypt_memo(&self, from: &Account, to: &Account, text: &str) -> Result<Memo> {
        let key = self.memo_key.as_ref().ok_or_else(|| MissingKey::MemoKey {
            account: from.name.clone(),
        })?;
        let prefix = self.node.chain_params()?.prefix;

        let sender = key.public_key().to_prefixed(&prefix);
        if sender != from.options.memo_key {
            warn!(
                "Configured memo key does not match the memo key of {}",
                from.name
            );
        }
        let recipient = PublicKey::from_prefixed(&to.options.memo_key, &prefix)?;
        let nonce = gph_crypto_memo::random_nonce();

        Ok(Memo {
            from: sender,
            to: to.options.memo_key.clone(),
            nonce,
            message: gph_crypto_memo::encrypt_hex(key, &recipient, nonce, text),
        })
    }
}

#[async_trait]
impl TransferExecutor for Wallet {
    async fn execute(&self, request: TransferRequest) -> Result<TransferReceipt> {
        self.transfer(&request).await
    }
}
