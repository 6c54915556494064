//! Chain binary serialization.
//!
//! Integers are little-endian, lengths and object id instances are unsigned
//! LEB128 varints, public keys are 33 compressed bytes and optional fields
//! carry a one-byte presence flag.

use super::{Memo, Operation, ProposalCreateOperation, Transaction, TransferOperation};
use crate::{
    error::{Error, Result},
    objects::{object_instance, AssetAmount},
};
use gph_crypto_keys::PublicKey;
use serde_json::Value;

/// Serialize a transaction without signatures.
pub fn transaction(tx: &Transaction, prefix: &str) -> Result<Vec<u8>> {
    let mut writer = Writer::new(prefix);
    writer.u16(tx.ref_block_num);
    writer.u32(tx.ref_block_prefix);
    writer.u32(tx.expiration);
    writer.varint(tx.operations.len() as u64);
    for op in &tx.operations {
        writer.operation(op)?;
    }
    writer.extensions(&tx.extensions)?;
    Ok(writer.finish())
}

/// Serialize a single `[tag, body]` operation.
pub fn operation(op: &Operation, prefix: &str) -> Result<Vec<u8>> {
    let mut writer = Writer::new(prefix);
    writer.operation(op)?;
    Ok(writer.finish())
}

/// Unsigned LEB128.
pub fn encode_varint(value: u64, out: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
}

struct Writer<'a> {
    out: Vec<u8>,
    prefix: &'a str,
}

impl<'a> Writer<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            out: Vec::with_capacity(256),
            prefix,
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }

    fn varint(&mut self, value: u64) {
        encode_varint(value, &mut self.out);
    }

    fn u8(&mut self, value: u8) {
        self.out.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn bytes(&mut self, value: &[u8]) {
        self.varint(value.len() as u64);
        self.out.extend_from_slice(value);
    }

    fn object_id(&mut self, id: &str) -> Result<()> {
        self.varint(object_instance(id)?);
        Ok(())
    }

    fn asset(&mut self, amount: &AssetAmount) -> Result<()> {
        self.i64(amount.amount);
        self.object_id(&amount.asset_id)
    }

    fn public_key(&mut self, text: &str) -> Result<()> {
        let key = PublicKey::from_prefixed(text, self.prefix)?;
        self.out.extend_from_slice(&key.to_bytes());
        Ok(())
    }

    fn extensions(&mut self, extensions: &[Value]) -> Result<()> {
        if !extensions.is_empty() {
            return Err(Error::validation("extensions are not supported"));
        }
        self.varint(0);
        Ok(())
    }

    fn operation(&mut self, op: &Operation) -> Result<()> {
        self.varint(u64::from(op.tag()));
        match op {
            Operation::Transfer(transfer) => self.transfer(transfer),
            Operation::ProposalCreate(proposal) => self.proposal_create(proposal),
        }
    }

    fn transfer(&mut self, op: &TransferOperation) -> Result<()> {
        self.asset(&op.fee)?;
        self.object_id(&op.from)?;
        self.object_id(&op.to)?;
        self.asset(&op.amount)?;
        match &op.memo {
            Some(memo) => {
                self.u8(1);
                self.memo(memo)?;
            }
            None => self.u8(0),
        }
        self.extensions(&op.extensions)
    }

    fn memo(&mut self, memo: &Memo) -> Result<()> {
        self.public_key(&memo.from)?;
        self.public_key(&memo.to)?;
        self.u64(memo.nonce);
        let message = hex::decode(&memo.message)
            .map_err(|e| Error::validation(format!("memo message: {}", e)))?;
        self.bytes(&message);
        Ok(())
    }

    fn proposal_create(&mut self, op: &ProposalCreateOperation) -> Result<()> {
        self.asset(&op.fee)?;
        self.object_id(&op.fee_paying_account)?;
        self.u32(op.expiration_time);
        self.varint(op.proposed_ops.len() as u64);
        for proposed in &op.proposed_ops {
            self.operation(&proposed.op)?;
        }
        match op.review_period_seconds {
            Some(period) => {
                self.u8(1);
                self.u32(period);
            }
            None => self.u8(0),
        }
        self.extensions(&op.extensions)
    }
}
