use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::GENESIS_PREV_HASH;
use crate::Block;

/// True when `hash` starts with at least `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Mine the block by incrementing the nonce from 0 until its hash meets `difficulty`.
///
/// The token is polled on every attempt; `None` means mining was cancelled.
/// This loop is CPU-bound and unbounded, so callers must not hold any ledger
/// lock while it runs.
pub fn mine(mut block: Block, difficulty: usize, cancel: &CancellationToken) -> Option<Block> {
    let mut prefix = Sha256::new();
    prefix.update(block.prefix_bytes());

    let mut nonce = 0u64;
    loop {
        if cancel.is_cancelled() {
            debug!(index = block.index, attempts = nonce, "mining cancelled");
            return None;
        }
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_le_bytes());
        let hash = hex::encode(hasher.finalize());
        if meets_difficulty(&hash, difficulty) {
            block.nonce = nonce;
            block.hash = hash;
            info!(
                index = block.index,
                nonce,
                hash = %block.hash,
                "mined block"
            );
            return Some(block);
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Mines with a token that is never cancelled.
pub fn mine_uncancelled(block: Block, difficulty: usize) -> Block {
    let never = CancellationToken::new();
    match mine(block, difficulty, &never) {
        Some(block) => block,
        None => unreachable!("token is never cancelled"),
    }
}

/// A zero-transaction genesis block with an empty prev_hash, mined at `difficulty`.
pub fn mine_genesis(difficulty: usize) -> Block {
    mine_uncancelled(Block::candidate(0, GENESIS_PREV_HASH, vec![]), difficulty)
}

/// Cancellation control for in-flight mining jobs.
///
/// Jobs take the current epoch token. `restart` cancels every job of the
/// current epoch (e.g. after the chain was replaced underneath them) and opens a
/// new one; `shutdown` cancels all present and future jobs.
#[derive(Debug)]
pub struct MiningEpoch {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl MiningEpoch {
    pub fn new(root: CancellationToken) -> Self {
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn restart(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = self.root.child_token();
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl Default for MiningEpoch {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
