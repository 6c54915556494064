//! Activity tracking against an in-process node with a scripted account history.

mod common;

use common::*;
use gph_crypto_keys::PrivateKey;
use graphene_gateway::{
    assets::AssetCache,
    node_api::NodeApi,
    objects::AccountStatistics,
    tracker::{
        ActivityCursor, ActivityTracker, CursorStore, Direction, FileCursorStore,
        MemoryCursorStore, TrackerOptions, TransferEvent,
    },
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::mpsc;

const ALICE: &str = "1.2.100";
const BOB: &str = "1.2.200";

struct History {
    node: MockNode,
    api: NodeApi,
    alice_memo: PrivateKey,
    bob_memo: PrivateKey,
}

impl History {
    /// Account history of alice:
    ///
    /// | seq | op        | content                          |
    /// |-----|-----------|----------------------------------|
    /// | 41  | 1.11.41   | bob → alice 0.5 TEST             |
    /// | 42  | 1.11.42   | bob → alice 1 TEST, memo         |
    /// | 43  | 1.11.43   | alice → bob 2 TEST               |
    /// | 44  | 1.11.44   | alice → bob 0.25 TEST            |
    /// | 45  | 1.11.45   | bob → alice 3 TEST, broken memo  |
    async fn new() -> Self {
        let node = MockNode::new();
        let alice_memo = PrivateKey::generate();
        let bob_memo = PrivateKey::generate();
        node.insert_object(account_json(ALICE, "alice", &PrivateKey::generate(), &alice_memo));
        node.insert_object(account_json(BOB, "bob", &PrivateKey::generate(), &bob_memo));
        node.insert_object(asset_json("1.3.0", "TEST", 5, 1, 1));

        let history = Self {
            api: NodeApi::new(node.connect()),
            node,
            alice_memo,
            bob_memo,
        };
        assert!(history.api.connection().wait_until_ready().await);

        let memo = history.memo(7, "thanks");
        history.add_operation(41, json!([0, transfer(BOB, ALICE, 50_000, None)]));
        history.add_operation(42, json!([0, transfer(BOB, ALICE, 100_000, Some(memo))]));
        history.add_operation(43, json!([0, transfer(ALICE, BOB, 200_000, None)]));
        history.add_operation(44, json!([0, transfer(ALICE, BOB, 25_000, None)]));
        let broken = json!({
            "from": history.bob_memo.public_key().to_prefixed(PREFIX),
            "to": history.alice_memo.public_key().to_prefixed(PREFIX),
            "nonce": "9",
            "message": "00ff00ff"
        });
        history.add_operation(45, json!([0, transfer(BOB, ALICE, 300_000, Some(broken))]));
        history.set_head(45);
        history
    }

    fn memo(&self, nonce: u64, text: &str) -> Value {
        json!({
            "from": self.bob_memo.public_key().to_prefixed(PREFIX),
            "to": self.alice_memo.public_key().to_prefixed(PREFIX),
            "nonce": nonce.to_string(),
            "message": gph_crypto_memo::encrypt_hex(&self.bob_memo, &self.alice_memo.public_key(), nonce, text),
        })
    }

    /// History entry `2.9.<seq>` pointing at `1.11.<seq>`, included in block `1000 + seq`.
    fn add_operation(&self, sequence: u64, op: Value) {
        self.node.insert_object(json!({
            "id": format!("2.9.{}", sequence),
            "account": ALICE,
            "operation_id": format!("1.11.{}", sequence),
            "sequence": sequence,
            "next": format!("2.9.{}", sequence - 1)
        }));
        self.node.insert_object(json!({
            "id": format!("1.11.{}", sequence),
            "op": op,
            "block_num": 1000 + sequence,
            "trx_in_block": 0,
            "op_in_trx": 0
        }));
        self.node
            .insert_block(1000 + sequence, &format!("2026-03-01T00:00:{:02}", sequence));
    }

    fn set_head(&self, sequence: u64) -> AccountStatistics {
        let statistics = json!({
            "id": "2.6.100",
            "owner": ALICE,
            "most_recent_op": format!("2.9.{}", sequence),
            "total_ops": sequence,
            "removed_ops": 0
        });
        self.node.insert_object(statistics.clone());
        serde_json::from_value(statistics).unwrap()
    }

    fn tracker(
        &self,
        store: Arc<dyn CursorStore>,
        replay_history: bool,
    ) -> (ActivityTracker, mpsc::Receiver<TransferEvent>) {
        let (events, received) = mpsc::channel(64);
        let options = TrackerOptions {
            replay_history,
            ..TrackerOptions::new("alice")
        };
        let tracker = ActivityTracker::new(
            self.api.clone(),
            Arc::new(AssetCache::new(self.api.clone())),
            Some(self.alice_memo.clone()),
            store,
            events,
            options,
        )
        .unwrap();
        (tracker, received)
    }
}

fn transfer(from: &str, to: &str, amount: i64, memo: Option<Value>) -> Value {
    let mut body = json!({
        "fee": {"amount": 20000, "asset_id": "1.3.0"},
        "from": from,
        "to": to,
        "amount": {"amount": amount, "asset_id": "1.3.0"},
        "extensions": []
    });
    if let Some(memo) = memo {
        body["memo"] = memo;
    }
    body
}

fn cursor_at(sequence: u64) -> ActivityCursor {
    ActivityCursor {
        last_sequence: sequence,
        last_operation_id: format!("1.11.{}", sequence),
        most_recent_op: format!("2.9.{}", sequence),
        updated_at: 0,
    }
}

fn drain(received: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = received.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_resumes_after_cursor_in_order() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(41))));
    let (mut tracker, mut received) = history.tracker(store.clone(), false);

    let statistics = history.set_head(45);
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 4);

    let events = drain(&mut received);
    let ids: Vec<_> = events.iter().map(|e| e.record.operation_id.as_str()).collect();
    assert_eq!(ids, vec!["1.11.42", "1.11.43", "1.11.44", "1.11.45"]);

    let received_memo = &events[0];
    assert_eq!(received_memo.direction, Direction::Received);
    assert_eq!(received_memo.record.from, "bob");
    assert_eq!(received_memo.record.to, "alice");
    assert_eq!(received_memo.record.amount.amount, "1.00000");
    assert_eq!(received_memo.record.fee.raw, 20000);
    assert_eq!(received_memo.record.memo.as_deref(), Some("thanks"));
    assert_eq!(received_memo.record.nonce, Some(7));
    assert_eq!(received_memo.record.timestamp, "2026-03-01T00:00:42");
    assert_eq!(received_memo.record.block_num, 1042);

    assert_eq!(events[1].direction, Direction::Sent);
    assert_eq!(events[1].record.memo, None);
    assert_eq!(events[2].record.amount.amount, "0.25000");

    // An undecryptable memo does not stop the record.
    assert_eq!(events[3].record.memo, None);
    assert_eq!(events[3].record.nonce, Some(9));

    // Persisted after each of 42..45.
    assert_eq!(store.saves(), 4);
    assert_eq!(store.current().unwrap().last_sequence, 45);
    assert_eq!(store.current().unwrap().most_recent_op, "2.9.45");
    assert_eq!(tracker.cursor().unwrap().last_operation_id, "1.11.45");
}

#[tokio::test]
async fn test_repeated_update_is_noop() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(41))));
    let (mut tracker, mut received) = history.tracker(store.clone(), false);

    let statistics = history.set_head(45);
    tracker.process_update(&statistics).await.unwrap();
    drain(&mut received);
    let saves = store.saves();

    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 0);
    assert!(drain(&mut received).is_empty());
    assert_eq!(store.saves(), saves);
}

#[tokio::test]
async fn test_starts_at_head_without_cursor() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(None));
    let (mut tracker, mut received) = history.tracker(store.clone(), false);

    let statistics = history.set_head(45);
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 0);
    assert!(drain(&mut received).is_empty());
    assert_eq!(store.current().unwrap().last_sequence, 45);

    history.add_operation(46, json!([0, transfer(BOB, ALICE, 1, None)]));
    let statistics = history.set_head(46);
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 1);
    assert_eq!(drain(&mut received)[0].record.sequence, 46);
}

#[tokio::test]
async fn test_replays_whole_history_when_asked() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(None));
    let (mut tracker, mut received) = history.tracker(store.clone(), true);

    let statistics = history.set_head(45);
    // 2.9.40 does not exist, so the walk ends at 41.
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 5);
    let sequences: Vec<_> = drain(&mut received).iter().map(|e| e.record.sequence).collect();
    assert_eq!(sequences, vec![41, 42, 43, 44, 45]);
}

#[tokio::test]
async fn test_non_transfer_advances_cursor() {
    let history = History::new().await;
    history.add_operation(46, json!([6, {"fee": {"amount": 100, "asset_id": "1.3.0"}, "account": ALICE}]));
    history.add_operation(47, json!([0, transfer(BOB, ALICE, 7, None)]));
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(45))));
    let (mut tracker, mut received) = history.tracker(store.clone(), false);

    let statistics = history.set_head(47);
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 1);
    let sequences: Vec<_> = drain(&mut received).iter().map(|e| e.record.sequence).collect();
    assert_eq!(sequences, vec![47]);
    assert_eq!(store.saves(), 2);
    assert_eq!(store.current().unwrap().last_sequence, 47);
}

#[tokio::test]
async fn test_failure_stops_batch_without_skipping() {
    let history = History::new().await;
    // Operation 43 references a block the node does not have.
    history.node.insert_object(json!({
        "id": "1.11.43",
        "op": [0, transfer(ALICE, BOB, 200_000, None)],
        "block_num": 99_999
    }));
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(41))));
    let (mut tracker, mut received) = history.tracker(store.clone(), false);

    let statistics = history.set_head(45);
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 1);
    assert_eq!(store.current().unwrap().last_sequence, 42);
    drain(&mut received);

    history.node.insert_block(99_999, "2026-03-01T01:00:00");
    assert_eq!(tracker.process_update(&statistics).await.unwrap(), 3);
    let ids: Vec<_> = drain(&mut received)
        .into_iter()
        .map(|e| e.record.operation_id)
        .collect();
    assert_eq!(ids, vec!["1.11.43", "1.11.44", "1.11.45"]);
    assert_eq!(store.current().unwrap().last_sequence, 45);
}

#[tokio::test]
async fn test_cursor_file_survives_restart() {
    let history = History::new().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cursor.json");
    let file_store = FileCursorStore::new(&path);
    file_store.save(&cursor_at(41)).unwrap();

    let statistics = history.set_head(45);
    {
        let (mut tracker, _received) = history.tracker(Arc::new(FileCursorStore::new(&path)), false);
        tracker.process_update(&statistics).await.unwrap();
    }

    let (tracker, _received) = history.tracker(Arc::new(FileCursorStore::new(&path)), false);
    assert_eq!(tracker.cursor().unwrap().last_sequence, 45);
    assert_eq!(file_store.load().unwrap().unwrap().most_recent_op, "2.9.45");
}

#[tokio::test]
async fn test_pushed_updates_emit_events() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(45))));
    let (tracker, mut received) = history.tracker(store.clone(), false);
    let handle = tracker.start();

    // The statistics fetch follows the subscription.
    assert!(eventually(|| history.node.call_count("get_objects") >= 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    history.add_operation(46, json!([0, transfer(BOB, ALICE, 5, None)]));
    let statistics = history.set_head(46);
    history
        .node
        .notify(vec![serde_json::to_value(&statistics).unwrap()]);

    let event = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.record.operation_id, "1.11.46");
    assert_eq!(event.direction, Direction::Received);
    assert_eq!(store.current().unwrap().last_sequence, 46);

    history.api.connection().close().await;
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_resync_after_reconnect_closes_gap() {
    let history = History::new().await;
    let store = Arc::new(MemoryCursorStore::new(Some(cursor_at(45))));
    let (tracker, mut received) = history.tracker(store.clone(), false);
    let handle = tracker.start();
    assert!(eventually(|| history.node.call_count("get_objects") >= 1).await);

    // Missed while the channel is down: no notice is ever pushed.
    history.node.kill_session();
    history.add_operation(46, json!([0, transfer(BOB, ALICE, 5, None)]));
    history.set_head(46);

    let event = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.record.sequence, 46);

    history.api.connection().close().await;
    assert!(handle.await.unwrap().is_ok());
}
