//! Transaction assembly, signing and broadcast.
//!
//! A builder moves through
//! `Empty → Staged → FeesResolved → Signed → Broadcast`. A successful
//! broadcast returns it to `Empty`. Any failure of a node round trip or of
//! signing leaves it `Failed` until [`TransactionBuilder::clear`] is called.

use super::{time_point_sec, Operation, RefBlock, SignedTransaction, Transaction};
use crate::{
    authority::{AuthorityResolver, Permission, SignerSet},
    error::{Error, MissingKey, Result},
    node_api::NodeApi,
    objects::{Account, AssetAmount},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderState {
    Empty,
    Staged,
    FeesResolved,
    Signed,
    Broadcast,
    Failed,
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuilderState::Empty => "empty",
            BuilderState::Staged => "staged",
            BuilderState::FeesResolved => "fees resolved",
            BuilderState::Signed => "signed",
            BuilderState::Broadcast => "broadcast",
            BuilderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Acknowledgment of an accepted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub tx_id: String,
    pub transaction: SignedTransaction,
}

pub struct TransactionBuilder {
    node: NodeApi,
    resolver: Arc<AuthorityResolver>,
    state: BuilderState,
    operations: Vec<Operation>,
    signers: Vec<(Account, Permission)>,
    signed: Option<SignedTransaction>,
}

impl TransactionBuilder {
    pub fn new(node: NodeApi, resolver: Arc<AuthorityResolver>) -> Self {
        Self {
            node,
            resolver,
            state: BuilderState::Empty,
            operations: Vec::new(),
            signers: Vec::new(),
            signed: None,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The signed transaction, once [`sign`](Self::sign) succeeded.
    pub fn signed(&self) -> Option<&SignedTransaction> {
        self.signed.as_ref()
    }

    /// Stage more operations. Fees resolved earlier are discarded.
    pub fn append_ops(&mut self, ops: impl IntoIterator<Item = Operation>) -> Result<()> {
        self.expect_state(&[BuilderState::Empty, BuilderState::Staged, BuilderState::FeesResolved])?;
        self.operations.extend(ops);
        if !self.operations.is_empty() {
            self.state = BuilderState::Staged;
        }
        Ok(())
    }

    /// Require signatures of `account` with `permission`.
    pub fn add_signer(&mut self, account: &Account, permission: Permission) -> Result<()> {
        self.expect_state(&[BuilderState::Empty, BuilderState::Staged, BuilderState::FeesResolved])?;
        let known = self
            .signers
            .iter()
            .any(|(a, p)| a.id == account.id && *p == permission);
        if !known {
            self.signers.push((account.clone(), permission));
        }
        Ok(())
    }

    /// Query the node for the fee of every staged operation, paid in `fee_asset_id`.
    pub async fn resolve_fees(&mut self, fee_asset_id: &str) -> Result<()> {
        self.expect_state(&[BuilderState::Staged, BuilderState::FeesResolved])?;
        let result = self.fetch_fees(fee_asset_id).await;
        self.settle(result)?;
        self.state = BuilderState::FeesResolved;
        Ok(())
    }

    async fn fetch_fees(&mut self, fee_asset_id: &str) -> Result<()> {
        for op in &mut self.operations {
            set_fee_asset(op, fee_asset_id);
        }
        let ops = self
            .operations
            .iter()
            .map(Operation::to_value)
            .collect::<Result<Vec<_>>>()?;

        let fees = self.node.get_required_fees(&ops, fee_asset_id).await?;
        if fees.len() != self.operations.len() {
            return Err(Error::decode(format!(
                "{} fees returned for {} operations",
                fees.len(),
                self.operations.len()
            )));
        }
        for (op, fee) in self.operations.iter_mut().zip(&fees) {
            apply_fee(op, fee)?;
        }
        debug!("Resolved fees for {} operations", self.operations.len());
        Ok(())
    }

    /// Bind to the head block and sign with every key the added signers resolve to.
    pub async fn sign(&mut self, expiration: Duration) -> Result<&SignedTransaction> {
        self.expect_state(&[BuilderState::FeesResolved])?;
        if self.signers.is_empty() {
            return Err(Error::validation("no signer added"));
        }
        let result = self.sign_inner(expiration).await;
        let signed = self.settle(result)?;
        self.state = BuilderState::Signed;
        Ok(self.signed.insert(signed))
    }

    async fn sign_inner(&self, expiration: Duration) -> Result<SignedTransaction> {
        let chain = self.node.chain_params()?;

        let mut keys = SignerSet::default();
        for (account, permission) in &self.signers {
            keys.merge(self.resolver.resolve_signers(account, *permission).await?);
        }
        if keys.is_empty() {
            let account = self
                .signers
                .first()
                .map(|(a, _)| a.name.clone())
                .unwrap_or_default();
            return Err(MissingKey::NoUsableKeys { account }.into());
        }

        let head = self.node.get_dynamic_global_properties().await?;
        let reference = RefBlock::from_head(head.head_block_number, &head.head_block_id)?;
        let transaction = Transaction {
            ref_block_num: reference.num,
            ref_block_prefix: reference.prefix,
            expiration: expiration_from_now(expiration)?,
            operations: self.operations.clone(),
            extensions: Vec::new(),
        };

        let digest = transaction.digest(&chain)?;
        let signatures = keys
            .keys()
            .iter()
            .map(|key| key.sign_compact(&digest).map(hex::encode))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            "Signed transaction with {} keys, expires {}",
            signatures.len(),
            time_point_sec::format(transaction.expiration).unwrap_or_default()
        );
        Ok(SignedTransaction {
            transaction,
            signatures,
        })
    }

    /// Fees, then signatures.
    pub async fn build(&mut self, fee_asset_id: &str, expiration: Duration) -> Result<&SignedTransaction> {
        self.resolve_fees(fee_asset_id).await?;
        self.sign(expiration).await
    }

    /// Submit the signed transaction. On success the builder is cleared; a
    /// rejection is returned as the node reported it.
    pub async fn broadcast(&mut self) -> Result<BroadcastReceipt> {
        self.expect_state(&[BuilderState::Signed])?;
        let signed = match &self.signed {
            Some(signed) => signed.clone(),
            None => return Err(Error::validation("builder holds no signed transaction")),
        };
        let chain = self.node.chain_params()?;

        self.state = BuilderState::Broadcast;
        let result = async {
            let tx_id = signed.transaction.id(&chain.prefix)?;
            self.node
                .broadcast_transaction(&serde_json::to_value(&signed)?)
                .await?;
            Ok::<_, Error>(tx_id)
        }
        .await;
        let tx_id = self.settle(result)?;

        info!("Broadcast transaction {}", tx_id);
        self.clear();
        Ok(BroadcastReceipt {
            tx_id,
            transaction: signed,
        })
    }

    /// Drop staged operations, signers and signatures.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.signers.clear();
        self.signed = None;
        self.state = BuilderState::Empty;
    }

    fn expect_state(&self, allowed: &[BuilderState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "transaction builder is {}",
                self.state
            )))
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = BuilderState::Failed;
        }
        result
    }
}

fn expiration_from_now(expiration: Duration) -> Result<u32> {
    let now = Utc::now().timestamp();
    let seconds = i64::try_from(expiration.as_secs())
        .map_err(|_| Error::validation("expiration out of range"))?;
    u32::try_from(now.saturating_add(seconds)).map_err(|_| Error::validation("expiration out of range"))
}

/// Point the fee of `op`, and of any proposed operations, at `asset_id`.
fn set_fee_asset(op: &mut Operation, asset_id: &str) {
    op.fee_mut().asset_id = asset_id.to_string();
    if let Operation::ProposalCreate(proposal) = op {
        for proposed in &mut proposal.proposed_ops {
            set_fee_asset(&mut proposed.op, asset_id);
        }
    }
}

/// Write a `get_required_fees` entry into `op`. Proposals receive
/// `[fee, [nested fees]]`.
fn apply_fee(op: &mut Operation, fee: &Value) -> Result<()> {
    match (op, fee) {
        (Operation::ProposalCreate(proposal), Value::Array(parts)) => {
            let (outer, nested) = match parts.as_slice() {
                [outer, Value::Array(nested)] => (outer, nested),
                _ => return Err(Error::decode("malformed proposal fee")),
            };
            if nested.len() != proposal.proposed_ops.len() {
                return Err(Error::decode(format!(
                    "{} nested fees for {} proposed operations",
                    nested.len(),
                    proposal.proposed_ops.len()
                )));
            }
            proposal.fee = parse_amount(outer)?;
            for (proposed, fee) in proposal.proposed_ops.iter_mut().zip(nested) {
                apply_fee(&mut proposed.op, fee)?;
            }
            Ok(())
        }
        (op, fee) => {
            *op.fee_mut() = parse_amount(fee)?;
            Ok(())
        }
    }
}

fn parse_amount(value: &Value) -> Result<AssetAmount> {
    serde_json::from_value(value.clone()).map_err(|e| Error::decode(format!("fee: {}", e)))
}
