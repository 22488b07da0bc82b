#![allow(dead_code)]

use std::fs;

use powchain_core::pow::{mine_genesis, mine_uncancelled};
use powchain_core::{Block, Chain, Transaction};
use powchain_storage::SledStore;
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub const DIFFICULTY: usize = 1;

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("db");
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

/// A valid chain of `len` blocks, each carrying `txs_per_block` transactions
/// with random amounts.
pub fn build_chain(len: usize, txs_per_block: usize) -> Chain {
    let mut rng = rand::thread_rng();
    let mut chain = vec![mine_genesis(DIFFICULTY)];
    while chain.len() < len {
        let tip = chain.last().unwrap();
        let n = chain.len();
        let txs = (0..txs_per_block)
            .map(|i| Transaction::new(format!("addr_from_{n}_{i}"), format!("addr_to_{i}"), rng.gen_range(1..=1_000_000)))
            .collect();
        let candidate = Block::candidate(tip.index + 1, tip.hash.clone(), txs);
        chain.push(mine_uncancelled(candidate, DIFFICULTY));
    }
    chain
}
