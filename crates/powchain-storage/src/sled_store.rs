use anyhow::{Context, Result};
use powchain_core::{Block, LedgerStore};
use serde::{de::DeserializeOwned, Serialize};
use sled::{Batch, Db, Tree};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_PEERS: &str = "peers";

/// Chain and peer snapshots in two sled trees, keyed by big-endian position.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  peers: Tree,
  /// Serializes snapshot writes; the stale-key scan and the batch must not interleave.
  write_lock: Arc<Mutex<()>>,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled db at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    let peers = db.open_tree(TREE_PEERS)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self {
      db,
      blocks,
      peers,
      write_lock: Arc::new(Mutex::new(())),
    })
  }

  fn replace(&self, tree: &Tree, items: &[impl Serialize]) -> Result<()> {
    let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
    replace_tree(tree, items)
  }

  /// Drops both snapshots.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.peers.clear()?;
    self.db.flush()?;
    Ok(())
  }
}

fn position_key(pos: usize) -> Vec<u8> {
  (pos as u64).to_be_bytes().to_vec()
}

/// Overwrites `tree` with `items` in one atomic batch, removing keys past the new end.
fn replace_tree<T: Serialize>(tree: &Tree, items: &[T]) -> Result<()> {
  let mut batch = Batch::default();
  for (pos, item) in items.iter().enumerate() {
    batch.insert(position_key(pos), bincode::serialize(item)?);
  }
  let mut stale = 0usize;
  for entry in tree.range(position_key(items.len())..) {
    let (key, _) = entry?;
    batch.remove(key);
    stale += 1;
  }
  tree.apply_batch(batch)?;
  tree.flush()?;
  debug!(len = items.len(), stale, "snapshot written");
  Ok(())
}

fn load_tree<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
  tree
    .iter()
    .values()
    .map(|value| {
      let value = value?;
      bincode::deserialize(&value).context("decoding stored record")
    })
    .collect()
}

impl LedgerStore for SledStore {
  fn load_chain(&self) -> Result<Vec<Block>> {
    load_tree(&self.blocks)
  }

  fn save_chain(&self, chain: &[Block]) -> Result<()> {
    self.replace(&self.blocks, chain)
  }

  fn load_peers(&self) -> Result<Vec<String>> {
    load_tree(&self.peers)
  }

  fn save_peers(&self, peers: &[String]) -> Result<()> {
    self.replace(&self.peers, peers)
  }
}
