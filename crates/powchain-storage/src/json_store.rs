use anyhow::{Context, Result};
use powchain_core::{Block, LedgerStore};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub const CHAIN_FILE: &str = "blockchain.json";
pub const PEERS_FILE: &str = "peers.json";

/// Pretty-printed JSON files: `blockchain.json` holds the chain array and
/// `peers.json` the peer address array.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    // Both files share one `.tmp` naming scheme; writers take turns.
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        info!(dir = %dir.display(), "json store opened");
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn chain_path(&self) -> PathBuf {
        self.dir.join(CHAIN_FILE)
    }

    pub fn peers_path(&self) -> PathBuf {
        self.dir.join(PEERS_FILE)
    }

    fn write<T: Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_json_atomic(path, items)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Writes next to the target and renames over it, so readers never see a partial file.
fn write_json_atomic<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let json = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

impl LedgerStore for JsonFileStore {
    fn load_chain(&self) -> Result<Vec<Block>> {
        read_json(&self.chain_path())
    }

    fn save_chain(&self, chain: &[Block]) -> Result<()> {
        self.write(&self.chain_path(), chain)
    }

    fn load_peers(&self) -> Result<Vec<String>> {
        read_json(&self.peers_path())
    }

    fn save_peers(&self, peers: &[String]) -> Result<()> {
        self.write(&self.peers_path(), peers)
    }
}
