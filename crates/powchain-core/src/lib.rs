use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod constants;
pub mod error;
pub mod ledger;
pub mod peers;
pub mod pow;
pub mod store;
pub mod validate;

pub use error::{PeerError, ValidationError};
pub use ledger::Ledger;
pub use peers::PeerRegistry;
pub use store::{LedgerStore, MemoryStore};

/// An ordered sequence of blocks, genesis first.
pub type Chain = Vec<Block>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: u64) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub transactions: Vec<Transaction>,
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// Builds an unmined block (nonce 0, empty hash) stamped with the current UTC time.
    pub fn candidate(index: u64, prev_hash: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            index,
            timestamp: now_rfc3339(),
            transactions,
            prev_hash: prev_hash.into(),
            hash: String::new(),
            nonce: 0,
        }
    }

    /// Canonical encoding of every hashed field except the nonce.
    ///
    /// Strings are length-prefixed so that no two distinct field tuples share an
    /// encoding. The nonce is appended last by [`Block::hash_bytes`]; the miner
    /// relies on that to hash this prefix only once.
    pub fn prefix_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            8 + 8 + self.timestamp.len() + 8 + self.transactions.len() * 48 + 8 + self.prev_hash.len(),
        );
        bytes.extend_from_slice(&self.index.to_le_bytes());
        put_str(&mut bytes, &self.timestamp);
        bytes.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            put_str(&mut bytes, &tx.sender);
            put_str(&mut bytes, &tx.recipient);
            bytes.extend_from_slice(&tx.amount.to_le_bytes());
        }
        put_str(&mut bytes, &self.prev_hash);
        bytes
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = self.prefix_bytes();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Recomputes the hex SHA-256 digest of this block. The stored `hash` field is ignored.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_bytes());
        hex::encode(hasher.finalize())
    }
}

fn put_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u64).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
