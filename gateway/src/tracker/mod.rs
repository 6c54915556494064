//! Account activity tracking.
//!
//! The node pushes the tracked account's statistics object whenever the
//! account takes part in an operation. Each push names the newest account
//! history entry; entries form a list linked from newest to oldest through
//! `next`. The tracker walks that list back to its cursor, then replays the
//! collected entries oldest first, turning transfers into [`TransferEvent`]s
//! and persisting the cursor after every entry.
//!
//! After each successful handshake the statistics object is fetched again.
//! That re-arms the node-side subscription and closes any gap left while
//! disconnected.

pub mod cursor;
pub mod record;

pub use cursor::{ActivityCursor, CursorStore, FileCursorStore, MemoryCursorStore};
pub use record::{AssetValue, Direction, TransferEvent, TransferRecord};

use crate::{
    assets::AssetCache,
    codec::fragment_id,
    connection::ConnectionState,
    error::{Error, Result},
    node_api::NodeApi,
    objects::{Account, AccountStatistics, HistoryEntry, OperationHistory},
    transaction::{Memo, TransferOperation, TRANSFER_OPERATION},
};
use gph_crypto_keys::{PrivateKey, PublicKey};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Account name or id.
    pub account: String,

    /// Without a persisted cursor, replay the whole history instead of
    /// starting at the current head.
    pub replay_history: bool,

    /// Capacity of the queue between the subscription callback and the tracker.
    pub statistics_queue: usize,
}

impl TrackerOptions {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            replay_history: false,
            statistics_queue: 32,
        }
    }
}

pub struct ActivityTracker {
    node: NodeApi,
    assets: Arc<AssetCache>,
    memo_key: Option<PrivateKey>,
    store: Arc<dyn CursorStore>,
    events: mpsc::Sender<TransferEvent>,
    options: TrackerOptions,
    account: Option<Account>,
    cursor: Option<ActivityCursor>,
    names: HashMap<String, String>,
    subscribed: bool,
}

impl ActivityTracker {
    /// Create a tracker resuming from whatever `store` holds.
    pub fn new(
        node: NodeApi,
        assets: Arc<AssetCache>,
        memo_key: Option<PrivateKey>,
        store: Arc<dyn CursorStore>,
        events: mpsc::Sender<TransferEvent>,
        options: TrackerOptions,
    ) -> Result<Self> {
        let cursor = store.load()?;
        Ok(Self {
            node,
            assets,
            memo_key,
            store,
            events,
            options,
            account: None,
            cursor,
            names: HashMap::new(),
            subscribed: false,
        })
    }

    /// Resume from `cursor` instead of the stored one.
    pub fn with_cursor(mut self, cursor: ActivityCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn cursor(&self) -> Option<&ActivityCursor> {
        self.cursor.as_ref()
    }

    /// Run on a background task.
    pub fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Track until the connection is closed or fails permanently.
    pub async fn run(mut self) -> Result<()> {
        let connection = self.node.connection().clone();
        let mut states = connection.states();
        let (queue, mut updates) = mpsc::channel(self.options.statistics_queue.max(1));
        let mut generation = None;

        loop {
            let state = states.borrow_and_update().clone();
            match state {
                ConnectionState::Ready { generation: current } if generation != Some(current) => {
                    generation = Some(current);
                    if let Err(e) = self.resync(&queue).await {
                        warn!("Activity resync failed: {}", e);
                    }
                }
                ConnectionState::Failed(reason) => return Err(Error::Connection(reason)),
                ConnectionState::Closed => {
                    info!("Connection closed, activity tracker stopping");
                    return Ok(());
                }
                _ => {}
            }

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                Some(statistics) = updates.recv() => {
                    if let Err(e) = self.process_update(&statistics).await {
                        warn!("Failed to process account update: {}", e);
                    }
                }
            }
        }
    }

    /// Fetch the statistics object and process everything past the cursor.
    ///
    /// Registers the statistics subscription on first use.
    pub async fn resync(&mut self, queue: &mpsc::Sender<AccountStatistics>) -> Result<usize> {
        let account = self.tracked_account().await?;

        if !self.subscribed {
            let statistics_id = account.statistics.clone();
            let queue = queue.clone();
            self.node
                .connection()
                .subscribe(account.statistics.clone(), move |fragment| {
                    // Prefix matching would also deliver 2.6.1000 to 2.6.100.
                    if fragment_id(fragment) != Some(statistics_id.as_str()) {
                        return;
                    }
                    match serde_json::from_value::<AccountStatistics>(fragment.clone()) {
                        Ok(statistics) => {
                            if queue.try_send(statistics).is_err() {
                                debug!("Statistics queue full, dropping update");
                            }
                        }
                        Err(e) => debug!("Ignoring malformed statistics fragment: {}", e),
                    }
                });
            self.subscribed = true;
        }

        let statistics: AccountStatistics = self
            .node
            .get_object(&account.statistics)
            .await?
            .ok_or_else(|| Error::Rpc(format!("statistics {} not found", account.statistics)))?;
        self.process_update(&statistics).await
    }

    /// Handle one statistics update. Returns the number of transfers emitted.
    pub async fn process_update(&mut self, statistics: &AccountStatistics) -> Result<usize> {
        let account = self.tracked_account().await?;

        let cursor = match &self.cursor {
            Some(cursor) => cursor.clone(),
            None if self.options.replay_history => ActivityCursor::default(),
            None => return self.start_at_head(&account, statistics).await.map(|_| 0),
        };
        if !cursor.most_recent_op.is_empty() && statistics.most_recent_op == cursor.most_recent_op {
            return Ok(0);
        }

        let pending = self.collect_pending(&account, statistics, &cursor).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(
            "Processing {} history entries after sequence {}",
            pending.len(),
            cursor.last_sequence
        );

        let mut cursor = cursor;
        let mut emitted = 0;
        for entry in &pending {
            let event = match self.process_entry(&account, entry).await {
                Ok(event) => event,
                Err(e) => {
                    // Retried on the next update.
                    warn!(
                        "Failed to process operation {} (sequence {}): {}",
                        entry.operation_id, entry.sequence, e
                    );
                    break;
                }
            };

            if let Some(event) = event {
                if self.events.send(event).await.is_err() {
                    debug!("Transfer event receiver dropped");
                }
                emitted += 1;
            }

            cursor.advance(entry);
            self.store.save(&cursor)?;
            self.cursor = Some(cursor.clone());
        }
        Ok(emitted)
    }

    async fn tracked_account(&mut self) -> Result<Account> {
        if let Some(account) = &self.account {
            return Ok(account.clone());
        }
        let account = self.node.get_account(&self.options.account).await?;
        info!("Tracking account {} ({})", account.name, account.id);
        self.names.insert(account.id.clone(), account.name.clone());
        self.account = Some(account.clone());
        Ok(account)
    }

    async fn start_at_head(&mut self, account: &Account, statistics: &AccountStatistics) -> Result<()> {
        let mut cursor = ActivityCursor::default();
        match self.node.get_object::<HistoryEntry>(&statistics.most_recent_op).await? {
            Some(entry) if entry.account == account.id => cursor.advance(&entry),
            _ => cursor.most_recent_op = statistics.most_recent_op.clone(),
        }
        info!(
            "No activity cursor, starting at history sequence {}",
            cursor.last_sequence
        );
        self.store.save(&cursor)?;
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Entries newer than `cursor`, oldest first.
    async fn collect_pending(
        &self,
        account: &Account,
        statistics: &AccountStatistics,
        cursor: &ActivityCursor,
    ) -> Result<Vec<HistoryEntry>> {
        let mut pending: Vec<HistoryEntry> = Vec::new();
        let mut next = statistics.most_recent_op.clone();

        while !next.is_empty() {
            let entry = match self.node.get_object::<HistoryEntry>(&next).await? {
                Some(entry) => entry,
                None => break,
            };
            if entry.account != account.id
                || entry.sequence <= cursor.last_sequence
                || entry.sequence <= statistics.removed_ops
            {
                break;
            }
            // Sequences strictly decrease along `next`.
            if pending.last().is_some_and(|newer| entry.sequence >= newer.sequence) {
                warn!("History list of {} is not ordered at {}", account.name, entry.id);
                break;
            }
            next = entry.next.clone();
            pending.push(entry);
        }

        pending.reverse();
        Ok(pending)
    }

    async fn process_entry(&mut self, account: &Account, entry: &HistoryEntry) -> Result<Option<TransferEvent>> {
        let operation: OperationHistory = self
            .node
            .get_object(&entry.operation_id)
            .await?
            .ok_or_else(|| Error::Rpc(format!("operation {} not found", entry.operation_id)))?;

        let (tag, body) = &operation.op;
        if *tag != TRANSFER_OPERATION {
            debug!("Skipping operation {} of type {}", operation.id, tag);
            return Ok(None);
        }
        let transfer: TransferOperation = serde_json::from_value(body.clone())?;

        let direction = if transfer.from == account.id {
            Direction::Sent
        } else if transfer.to == account.id {
            Direction::Received
        } else {
            debug!("Operation {} does not involve {}", operation.id, account.name);
            return Ok(None);
        };

        let timestamp = self
            .node
            .get_block(operation.block_num)
            .await?
            .map(|block| block.timestamp)
            .ok_or_else(|| Error::Rpc(format!("block {} not found", operation.block_num)))?;
        let asset = self.assets.get(&transfer.amount.asset_id).await?;
        let fee_asset = self.assets.get(&transfer.fee.asset_id).await?;
        let from = self.account_name(&transfer.from).await?;
        let to = self.account_name(&transfer.to).await?;
        let memo = transfer
            .memo
            .as_ref()
            .and_then(|memo| self.decode_memo(account, &transfer, memo));

        Ok(Some(TransferEvent {
            direction,
            record: TransferRecord {
                operation_id: operation.id.clone(),
                sequence: entry.sequence,
                block_num: operation.block_num,
                trx_in_block: operation.trx_in_block,
                op_in_trx: operation.op_in_trx,
                timestamp,
                amount: AssetValue::new(transfer.amount.amount, &asset),
                fee: AssetValue::new(transfer.fee.amount, &fee_asset),
                from_id: transfer.from.clone(),
                from,
                to_id: transfer.to.clone(),
                to,
                memo,
                nonce: transfer.memo.as_ref().map(|memo| memo.nonce),
            },
        }))
    }

    async fn account_name(&mut self, id: &str) -> Result<String> {
        if let Some(name) = self.names.get(id) {
            return Ok(name.clone());
        }
        let account = self.node.get_account(id).await?;
        self.names.insert(account.id.clone(), account.name.clone());
        Ok(account.name)
    }

    /// Decrypt `memo` with the counterparty's memo key. Failures are logged
    /// and yield `None`.
    fn decode_memo(&self, account: &Account, transfer: &TransferOperation, memo: &Memo) -> Option<String> {
        let Some(local) = &self.memo_key else {
            debug!("No memo key configured, memo left encrypted");
            return None;
        };
        let counterparty = if transfer.to == account.id {
            &memo.from
        } else {
            &memo.to
        };

        let result = self.node.chain_params().and_then(|chain| {
            let counterparty = PublicKey::from_prefixed(counterparty, &chain.prefix)?;
            Ok(gph_crypto_memo::decrypt_hex(
                local,
                &counterparty,
                memo.nonce,
                &memo.message,
            )?)
        });
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Could not decode memo (nonce {}): {}", memo.nonce, e);
                None
            }
        }
    }
}
