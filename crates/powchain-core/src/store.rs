use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use crate::Block;

/// Trait the storage backends implement for the ledger and peer registry to persist.
/// This lives in `powchain-core` to avoid a circular dependency.
///
/// Each save replaces the whole snapshot and must be atomic: a reader of the
/// backing store sees either the previous snapshot or the new one.
pub trait LedgerStore: Send + Sync {
    /// Blocks ordered by index; empty when nothing was saved yet.
    fn load_chain(&self) -> Result<Vec<Block>>;
    fn save_chain(&self, chain: &[Block]) -> Result<()>;
    fn load_peers(&self) -> Result<Vec<String>>;
    fn save_peers(&self, peers: &[String]) -> Result<()>;
}

/// Volatile store for tests and `--storage memory` nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chain: Mutex<Vec<Block>>,
    peers: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn load_chain(&self) -> Result<Vec<Block>> {
        Ok(self.chain.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_chain(&self, chain: &[Block]) -> Result<()> {
        *self.chain.lock().unwrap_or_else(PoisonError::into_inner) = chain.to_vec();
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<String>> {
        Ok(self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_peers(&self, peers: &[String]) -> Result<()> {
        *self.peers.lock().unwrap_or_else(PoisonError::into_inner) = peers.to_vec();
        Ok(())
    }
}
