use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use powchain_core::{constants::DEFAULT_DIFFICULTY, LedgerStore, MemoryStore};
use powchain_storage::{JsonFileStore, SledStore};

use crate::constants::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "powchain-node")]
#[command(about = "Proof-of-work ledger node with longest-chain peer sync")]
pub struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "POWCHAIN_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Data directory for the chain and peer snapshots
    #[arg(long, env = "POWCHAIN_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Snapshot backend
    #[arg(long, env = "POWCHAIN_STORAGE", value_enum, default_value_t = StorageKind::Sled)]
    pub storage: StorageKind,

    /// Leading zero hex digits required in every block hash
    #[arg(long, env = "POWCHAIN_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Seconds between two peer sync passes
    #[arg(long, env = "POWCHAIN_SYNC_INTERVAL_SECS", default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    pub sync_interval_secs: u64,

    /// Upper bound for a single peer fetch or push, in milliseconds
    #[arg(long, env = "POWCHAIN_PEER_TIMEOUT_MS", default_value_t = DEFAULT_PEER_TIMEOUT_MS)]
    pub peer_timeout_ms: u64,

    /// Peer pushes allowed in flight at once
    #[arg(long, env = "POWCHAIN_MAX_BROADCASTS", default_value_t = DEFAULT_MAX_BROADCASTS)]
    pub max_broadcasts: usize,

    /// Peer base URL to register at start-up (repeatable)
    #[arg(long = "peer", env = "POWCHAIN_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Embedded sled database
    Sled,
    /// `blockchain.json` and `peers.json`
    Json,
    /// Nothing survives a restart
    Memory,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    pub difficulty: usize,
    pub sync_interval: Duration,
    pub peer_timeout: Duration,
    pub max_broadcasts: usize,
    pub seed_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            storage: StorageKind::Sled,
            difficulty: DEFAULT_DIFFICULTY,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            peer_timeout: Duration::from_millis(DEFAULT_PEER_TIMEOUT_MS),
            max_broadcasts: DEFAULT_MAX_BROADCASTS,
            seed_peers: Vec::new(),
        }
    }
}

impl TryFrom<Args> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let listen = args
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", args.listen))?;
        Ok(Self {
            listen,
            data_dir: args.data_dir,
            storage: args.storage,
            difficulty: args.difficulty,
            sync_interval: Duration::from_secs(args.sync_interval_secs.max(1)),
            peer_timeout: Duration::from_millis(args.peer_timeout_ms.max(1)),
            max_broadcasts: args.max_broadcasts.max(1),
            seed_peers: args.peers,
        })
    }
}

impl NodeConfig {
    pub fn open_store(&self) -> Result<Arc<dyn LedgerStore>> {
        let store: Arc<dyn LedgerStore> = match self.storage {
            StorageKind::Sled => Arc::new(SledStore::open(&self.data_dir)?),
            StorageKind::Json => Arc::new(JsonFileStore::open(&self.data_dir)?),
            StorageKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
