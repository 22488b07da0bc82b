//! The live chain and the only place it is mutated.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::error::ValidationError;
use crate::pow::mine_genesis;
use crate::store::LedgerStore;
use crate::validate::{check_block, check_chain};
use crate::{Block, Chain, Transaction};

struct ChainState {
    blocks: Arc<Chain>,
    /// Bumped on every successful mutation.
    version: u64,
}

/// Owned chain behind a reader/writer lock.
///
/// Reads clone an `Arc` of the current chain, so a snapshot stays usable after
/// the lock is released. `append` and `replace_if_better` take the write lock
/// only for the check-and-mutate step; mining, network I/O and persistence all
/// happen outside of it.
pub struct Ledger<S: LedgerStore + ?Sized = dyn LedgerStore> {
    state: RwLock<ChainState>,
    /// Version of the last snapshot written to the store.
    persisted: Mutex<u64>,
    store: Arc<S>,
    difficulty: usize,
}

impl<S: LedgerStore + ?Sized> Ledger<S> {
    /// Loads the stored chain, or mines and persists a genesis block when the store is empty.
    pub fn open(store: Arc<S>, difficulty: usize) -> Result<Self> {
        let stored = store.load_chain().context("loading chain snapshot")?;
        if stored.is_empty() {
            let genesis = mine_genesis(difficulty);
            info!(hash = %genesis.hash, difficulty, "created genesis block");
            let ledger = Self::from_parts(store, vec![genesis], 1, 0, difficulty);
            let snapshot = ledger.snapshot();
            ledger.persist(&snapshot, 1);
            return Ok(ledger);
        }

        if let Err(err) = check_chain(&stored, difficulty) {
            bail!("stored chain is invalid: {err}");
        }
        info!(height = stored.len() - 1, "loaded chain snapshot");
        Ok(Self::from_parts(store, stored, 0, 0, difficulty))
    }

    fn from_parts(
        store: Arc<S>,
        blocks: Chain,
        version: u64,
        persisted: u64,
        difficulty: usize,
    ) -> Self {
        Self {
            state: RwLock::new(ChainState {
                blocks: Arc::new(blocks),
                version,
            }),
            persisted: Mutex::new(persisted),
            store,
            difficulty,
        }
    }

    // Every mutation completes before its guard drops, so a poisoned lock
    // still guards a consistent chain.
    fn read(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Immutable view of the chain as it is right now.
    pub fn snapshot(&self) -> Arc<Chain> {
        Arc::clone(&self.read().blocks)
    }

    pub fn len(&self) -> usize {
        self.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().blocks.is_empty()
    }

    pub fn tip(&self) -> Option<Block> {
        self.read().blocks.last().cloned()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        let index = usize::try_from(index).ok()?;
        self.read().blocks.get(index).cloned()
    }

    /// Unmined successor of the current tip carrying `transactions`.
    pub fn candidate(&self, transactions: Vec<Transaction>) -> Block {
        let (index, prev_hash) = match self.read().blocks.last() {
            Some(tip) => (tip.index + 1, tip.hash.clone()),
            None => (0, String::new()),
        };
        Block::candidate(index, prev_hash, transactions)
    }

    /// Appends `block` iff it is a valid successor of the tip at the moment of the call.
    ///
    /// A `false` return is the normal outcome when another block won the race
    /// for the same index.
    pub fn append(&self, block: Block) -> bool {
        let (snapshot, version) = {
            let mut state = self.write();
            let checked = match state.blocks.last() {
                Some(tip) => check_block(&block, tip, self.difficulty),
                None => Err(ValidationError::MalformedGenesis),
            };
            if let Err(err) = checked {
                warn!(index = block.index, %err, "rejected candidate block");
                return false;
            }
            info!(
                index = block.index,
                txs = block.transactions.len(),
                hash = %block.hash,
                "appended block"
            );
            Arc::make_mut(&mut state.blocks).push(block);
            state.version += 1;
            (Arc::clone(&state.blocks), state.version)
        };
        self.persist(&snapshot, version);
        true
    }

    /// Adopts `candidate` iff it is fully valid and strictly longer than the current chain.
    pub fn replace_if_better(&self, candidate: Chain) -> bool {
        // Validation only reads the candidate, so it runs before the lock is taken.
        if let Err(err) = check_chain(&candidate, self.difficulty) {
            warn!(len = candidate.len(), %err, "ignoring invalid candidate chain");
            return false;
        }
        let (snapshot, version) = {
            let mut state = self.write();
            let current = state.blocks.len();
            if candidate.len() <= current {
                debug!(candidate = candidate.len(), current, "candidate chain is not longer");
                return false;
            }
            info!(from = current, to = candidate.len(), "replaced chain with longer valid chain");
            state.blocks = Arc::new(candidate);
            state.version += 1;
            (Arc::clone(&state.blocks), state.version)
        };
        self.persist(&snapshot, version);
        true
    }

    /// Re-validates the live chain.
    pub fn verify(&self) -> Result<(), ValidationError> {
        check_chain(&self.snapshot(), self.difficulty)
    }

    fn persist(&self, chain: &[Block], version: u64) {
        let mut last = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= *last {
            debug!(version, last = *last, "newer snapshot already persisted");
            return;
        }
        match self.store.save_chain(chain) {
            Ok(()) => *last = version,
            Err(err) => error!(
                error = ?err,
                version,
                "failed to persist chain snapshot; latest blocks are held in memory only"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::mine_uncancelled;
    use crate::store::MemoryStore;
    use crate::validate::is_chain_valid;
    use std::sync::Barrier;

    const D: usize = 2;

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::open(Arc::new(MemoryStore::new()), D).unwrap()
    }

    fn mine_next(chain: &[Block], txs: Vec<Transaction>) -> Block {
        let tip = chain.last().unwrap();
        mine_uncancelled(Block::candidate(tip.index + 1, tip.hash.clone(), txs), D)
    }

    fn extend(mut chain: Chain, to_len: usize, tag: &str) -> Chain {
        while chain.len() < to_len {
            let n = chain.len() as u64;
            let block = mine_next(&chain, vec![Transaction::new(tag, "miner", n)]);
            chain.push(block);
        }
        chain
    }

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn load_chain(&self) -> Result<Vec<Block>> {
            Ok(vec![])
        }
        fn save_chain(&self, _: &[Block]) -> Result<()> {
            bail!("disk full")
        }
        fn load_peers(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn save_peers(&self, _: &[String]) -> Result<()> {
            bail!("disk full")
        }
    }

    #[test]
    fn open_creates_and_persists_genesis() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), D).unwrap();
        let genesis = ledger.tip().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, "");
        assert!(genesis.hash.starts_with("00"));
        assert_eq!(store.load_chain().unwrap(), vec![genesis]);
    }

    #[test]
    fn open_reloads_stored_chain() {
        let store = Arc::new(MemoryStore::new());
        let first = Ledger::open(store.clone(), D).unwrap();
        let block = mine_next(&first.snapshot(), vec![Transaction::new("A", "B", 1)]);
        assert!(first.append(block));
        let reopened = Ledger::open(store, D).unwrap();
        assert_eq!(*reopened.snapshot(), *first.snapshot());
    }

    #[test]
    fn open_refuses_corrupt_chain() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), D).unwrap();
        let mut chain = extend((*ledger.snapshot()).clone(), 3, "x");
        chain[1].transactions[0].amount = 99;
        store.save_chain(&chain).unwrap();
        assert!(Ledger::open(store, D).is_err());
    }

    #[test]
    fn append_single_transaction_block() {
        let ledger = ledger();
        let genesis = ledger.tip().unwrap();
        let candidate = ledger.candidate(vec![Transaction::new("A", "B", 10)]);
        let mined = mine_uncancelled(candidate, D);
        assert!(ledger.append(mined));

        let block = ledger.block(1).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert!(block.hash.starts_with(&"0".repeat(D)));
        assert_eq!(block.transactions, vec![Transaction::new("A", "B", 10)]);
        assert!(ledger.verify().is_ok());
    }

    #[test]
    fn stale_candidate_is_rejected() {
        let ledger = ledger();
        let a = mine_uncancelled(ledger.candidate(vec![Transaction::new("A", "B", 1)]), D);
        let b = mine_uncancelled(ledger.candidate(vec![Transaction::new("C", "D", 2)]), D);
        assert!(ledger.append(a));
        assert!(!ledger.append(b));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn unmined_candidate_is_rejected() {
        let ledger = ledger();
        let candidate = ledger.candidate(vec![Transaction::new("A", "B", 1)]);
        assert!(!ledger.append(candidate));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let ledger = ledger();
        let before = ledger.snapshot();
        let block = mine_uncancelled(ledger.candidate(vec![Transaction::new("A", "B", 1)]), D);
        assert!(ledger.append(block));
        assert_eq!(before.len(), 1);
        assert_eq!(ledger.snapshot().len(), 2);
    }

    #[test]
    fn block_lookup_out_of_range() {
        let ledger = ledger();
        assert!(ledger.block(0).is_some());
        assert!(ledger.block(1).is_none());
        assert!(ledger.block(u64::MAX).is_none());
    }

    #[test]
    fn replace_adopts_only_strictly_longer_valid_chains() {
        let ledger = ledger();
        let genesis = (*ledger.snapshot()).clone();
        let short = extend(genesis.clone(), 3, "short");
        let long = extend(genesis, 5, "long");

        assert!(ledger.replace_if_better(short.clone()));
        assert_eq!(*ledger.snapshot(), short);

        // Equal length never wins.
        let rival = extend(vec![short[0].clone()], 3, "rival");
        assert!(!ledger.replace_if_better(rival));
        assert_eq!(*ledger.snapshot(), short);

        let mut forged = long.clone();
        forged[3].transactions[0].amount += 1;
        assert!(!ledger.replace_if_better(forged));
        assert_eq!(*ledger.snapshot(), short);

        assert!(ledger.replace_if_better(long.clone()));
        assert_eq!(*ledger.snapshot(), long);
        assert!(!ledger.replace_if_better(short));
        assert!(!ledger.replace_if_better(vec![]));
    }

    #[test]
    fn replace_picks_length_five_over_three() {
        let ledger = ledger();
        let genesis = (*ledger.snapshot()).clone();
        let three = extend(genesis.clone(), 3, "three");
        let five = extend(genesis, 5, "five");

        assert!(ledger.replace_if_better(five.clone()));
        assert!(!ledger.replace_if_better(three));
        assert_eq!(*ledger.snapshot(), five);
        assert_eq!(ledger.store().load_chain().unwrap(), five);
    }

    #[test]
    fn concurrent_appends_on_same_tip_accept_exactly_one() {
        const N: usize = 8;
        let ledger = Arc::new(ledger());
        let candidates: Vec<Block> = (0..N)
            .map(|i| {
                let c = ledger.candidate(vec![Transaction::new(format!("s{i}"), "r", i as u64)]);
                mine_uncancelled(c, D)
            })
            .collect();

        let barrier = Arc::new(Barrier::new(N));
        let handles: Vec<_> = candidates
            .into_iter()
            .map(|block| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.append(block)
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(ledger.len(), 2);
        assert!(is_chain_valid(&ledger.snapshot(), D));
    }

    #[test]
    fn concurrent_miners_never_share_an_index() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let mut accepted = 0;
                    for round in 0..5u64 {
                        let c = ledger.candidate(vec![Transaction::new(
                            format!("w{worker}"),
                            "r",
                            round,
                        )]);
                        if ledger.append(mine_uncancelled(c, D)) {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let chain = ledger.snapshot();
        assert_eq!(chain.len(), accepted + 1);
        for (pos, block) in chain.iter().enumerate() {
            assert_eq!(block.index, pos as u64);
        }
        assert!(is_chain_valid(&chain, D));
    }

    #[test]
    fn persistence_failure_keeps_ledger_running() {
        let ledger = Ledger::open(Arc::new(FailingStore), D).unwrap();
        let block = mine_uncancelled(ledger.candidate(vec![Transaction::new("A", "B", 1)]), D);
        assert!(ledger.append(block));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn ledger_over_trait_object() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger: Ledger = Ledger::open(store, D).unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
