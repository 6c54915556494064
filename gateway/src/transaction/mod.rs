//! Transactions and the operations the gateway submits.
//!
//! Operations travel as `[tag, body]` pairs in JSON. The same structures are
//! serialized to the chain's binary layout (see [`serialize`]) to compute the
//! signing digest and the transaction id.

pub mod builder;
pub mod serialize;

pub use builder::{BroadcastReceipt, BuilderState, TransactionBuilder};

use crate::{
    chain::ChainParams,
    error::{Error, Result},
    objects::{flexible, AssetAmount},
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Operation tag of an asset transfer.
pub const TRANSFER_OPERATION: u16 = 0;

/// Operation tag of a proposal wrapping other operations.
pub const PROPOSAL_CREATE_OPERATION: u16 = 22;

/// Layout of `expiration` and other time points in JSON.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Encrypted memo attached to a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    /// Sender memo key, prefixed text form.
    pub from: String,
    /// Recipient memo key, prefixed text form.
    pub to: String,
    #[serde(serialize_with = "nonce_as_string", deserialize_with = "flexible::u64")]
    pub nonce: u64,
    /// Hex ciphertext.
    pub message: String,
}

fn nonce_as_string<S: Serializer>(nonce: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(nonce)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOperation {
    pub fee: AssetAmount,
    pub from: String,
    pub to: String,
    pub amount: AssetAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<Memo>,
    #[serde(default)]
    pub extensions: Vec<Value>,
}

/// Entry of `proposed_ops`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedOperation {
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalCreateOperation {
    pub fee: AssetAmount,
    pub fee_paying_account: String,
    #[serde(with = "time_point_sec")]
    pub expiration_time: u32,
    pub proposed_ops: Vec<ProposedOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_period_seconds: Option<u32>,
    #[serde(default)]
    pub extensions: Vec<Value>,
}

/// Operations the gateway can build and sign.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Transfer(TransferOperation),
    ProposalCreate(ProposalCreateOperation),
}

impl Operation {
    pub fn tag(&self) -> u16 {
        match self {
            Operation::Transfer(_) => TRANSFER_OPERATION,
            Operation::ProposalCreate(_) => PROPOSAL_CREATE_OPERATION,
        }
    }

    pub fn fee(&self) -> &AssetAmount {
        match self {
            Operation::Transfer(op) => &op.fee,
            Operation::ProposalCreate(op) => &op.fee,
        }
    }

    pub fn fee_mut(&mut self) -> &mut AssetAmount {
        match self {
            Operation::Transfer(op) => &mut op.fee,
            Operation::ProposalCreate(op) => &mut op.fee,
        }
    }

    /// `[tag, body]` JSON form.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Operation::Transfer(op) => (TRANSFER_OPERATION, op).serialize(serializer),
            Operation::ProposalCreate(op) => (PROPOSAL_CREATE_OPERATION, op).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (tag, body) = <(u16, Value)>::deserialize(deserializer)?;
        match tag {
            TRANSFER_OPERATION => serde_json::from_value(body)
                .map(Operation::Transfer)
                .map_err(D::Error::custom),
            PROPOSAL_CREATE_OPERATION => serde_json::from_value(body)
                .map(Operation::ProposalCreate)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("unsupported operation {}", other))),
        }
    }
}

impl From<TransferOperation> for Operation {
    fn from(op: TransferOperation) -> Self {
        Operation::Transfer(op)
    }
}

impl From<ProposalCreateOperation> for Operation {
    fn from(op: ProposalCreateOperation) -> Self {
        Operation::ProposalCreate(op)
    }
}

/// Replay protection fields taken from the head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefBlock {
    pub num: u16,
    pub prefix: u32,
}

impl RefBlock {
    /// Low 16 bits of the block number, and bytes 4..8 of the block id as a
    /// little-endian `u32`.
    pub fn from_head(head_block_number: u32, head_block_id: &str) -> Result<Self> {
        let id = hex::decode(head_block_id)
            .map_err(|e| Error::decode(format!("head block id: {}", e)))?;
        let prefix: [u8; 4] = id
            .get(4..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::decode("head block id is too short"))?;

        Ok(Self {
            num: (head_block_number & 0xFFFF) as u16,
            prefix: u32::from_le_bytes(prefix),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    #[serde(with = "time_point_sec")]
    pub expiration: u32,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub extensions: Vec<Value>,
}

impl Transaction {
    /// Chain binary form. `prefix` is needed to read memo keys.
    pub fn to_bytes(&self, prefix: &str) -> Result<Vec<u8>> {
        serialize::transaction(self, prefix)
    }

    /// SHA-256 over the chain id followed by the binary transaction.
    pub fn digest(&self, chain: &ChainParams) -> Result<[u8; 32]> {
        let chain_id = chain
            .chain_id_bytes()
            .map_err(|e| Error::validation(format!("chain id: {}", e)))?;
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(self.to_bytes(&chain.prefix)?);
        Ok(hasher.finalize().into())
    }

    /// Hex of the first 20 bytes of SHA-256 over the binary transaction.
    pub fn id(&self, prefix: &str) -> Result<String> {
        let hash = Sha256::digest(self.to_bytes(prefix)?);
        Ok(hex::encode(&hash[..20]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Hex compact signatures.
    #[serde(default)]
    pub signatures: Vec<String>,
}

/// Seconds since the epoch, rendered as [`TIME_FORMAT`] in UTC.
pub mod time_point_sec {
    use super::TIME_FORMAT;
    use chrono::{DateTime, NaiveDateTime};
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn format(seconds: u32) -> Option<String> {
        DateTime::from_timestamp(i64::from(seconds), 0)
            .map(|time| time.format(TIME_FORMAT).to_string())
    }

    pub fn parse(text: &str) -> Option<u32> {
        let time = NaiveDateTime::parse_from_str(text, TIME_FORMAT).ok()?;
        u32::try_from(time.and_utc().timestamp()).ok()
    }

    pub fn serialize<S: Serializer>(seconds: &u32, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let text = format(*seconds).ok_or_else(|| S::Error::custom("time out of range"))?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| D::Error::custom(format!("invalid time {}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transfer() -> TransferOperation {
        TransferOperation {
            fee: AssetAmount::new(0, "1.3.0"),
            from: "1.2.17".into(),
            to: "1.2.18".into(),
            amount: AssetAmount::new(100_000, "1.3.0"),
            memo: None,
            extensions: Vec::new(),
        }
    }

    #[test]
    fn test_operation_json_shape() {
        let value = Operation::from(transfer()).to_value().unwrap();
        assert_eq!(value[0], json!(0));
        assert_eq!(value[1]["from"], json!("1.2.17"));
        assert!(value[1].get("memo").is_none());

        let back: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(back, Operation::Transfer(transfer()));
    }

    #[test]
    fn test_memo_nonce_is_a_string() {
        let memo = Memo {
            from: "TEST1".into(),
            to: "TEST2".into(),
            nonce: 18_446_744_073_709_551_615,
            message: "00".into(),
        };
        let value = serde_json::to_value(&memo).unwrap();
        assert_eq!(value["nonce"], json!("18446744073709551615"));
        let back: Memo = serde_json::from_value(value).unwrap();
        assert_eq!(back.nonce, u64::MAX);
    }

    #[test]
    fn test_unknown_operation_rejected() {
        assert!(serde_json::from_value::<Operation>(json!([5, {}])).is_err());
    }

    #[test]
    fn test_ref_block() {
        let head = "00bc614e1a2b3c4d000000000000000000000000";
        let reference = RefBlock::from_head(0x00BC_614E, head).unwrap();
        assert_eq!(reference.num, 0x614E);
        assert_eq!(reference.prefix, 0x4d3c_2b1a);

        assert!(RefBlock::from_head(1, "00bc").is_err());
        assert!(RefBlock::from_head(1, "zz").is_err());
    }

    #[test]
    fn test_expiration_format() {
        assert_eq!(time_point_sec::format(0).unwrap(), "1970-01-01T00:00:00");
        assert_eq!(time_point_sec::parse("2024-01-01T00:00:00"), Some(1_704_067_200));

        let tx = SignedTransaction {
            transaction: Transaction {
                ref_block_num: 1,
                ref_block_prefix: 2,
                expiration: 1_704_067_200,
                operations: vec![transfer().into()],
                extensions: Vec::new(),
            },
            signatures: vec!["1f".into()],
        };
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["expiration"], json!("2024-01-01T00:00:00"));
        assert_eq!(value["signatures"], json!(["1f"]));
        assert_eq!(value["operations"][0][0], json!(0));
    }

    #[test]
    fn test_digest_depends_on_chain() {
        let tx = Transaction {
            ref_block_num: 1,
            ref_block_prefix: 2,
            expiration: 3,
            operations: vec![transfer().into()],
            extensions: Vec::new(),
        };
        let main = ChainParams::new(crate::chain::BITSHARES_CHAIN_ID, "BTS", "BTS");
        let test = ChainParams::new(crate::chain::TESTNET_CHAIN_ID, "TEST", "TEST");
        assert_ne!(tx.digest(&main).unwrap(), tx.digest(&test).unwrap());
        assert_eq!(tx.id("BTS").unwrap().len(), 40);
    }
}
