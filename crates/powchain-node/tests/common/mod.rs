#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use powchain_core::{
    pow::{mine_genesis, mine_uncancelled},
    Block, Chain, Ledger, LedgerStore, MemoryStore, PeerRegistry, Transaction,
};
use powchain_node::{ClientError, Node, NodeConfig, PeerClient};
use reqwest::StatusCode;

pub const DIFFICULTY: usize = 2;

/// In-process stand-in for remote peers.
#[derive(Default)]
pub struct MockClient {
    chains: Mutex<HashMap<String, Chain>>,
    down: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    pushes: Mutex<Vec<(String, Vec<Transaction>)>>,
}

impl MockClient {
    pub fn set_chain(&self, peer: &str, chain: Chain) {
        self.chains.lock().unwrap().insert(peer.to_string(), chain);
    }

    pub fn set_down(&self, peer: &str) {
        self.down.lock().unwrap().insert(peer.to_string());
    }

    pub fn set_hanging(&self, peer: &str) {
        self.hanging.lock().unwrap().insert(peer.to_string());
    }

    pub fn pushes(&self) -> Vec<(String, Vec<Transaction>)> {
        self.pushes.lock().unwrap().clone()
    }

    async fn gate(&self, peer: &str) -> Result<(), ClientError> {
        let hanging = self.hanging.lock().unwrap().contains(peer);
        if hanging {
            std::future::pending::<()>().await;
        }
        let down = self.down.lock().unwrap().contains(peer);
        if down {
            return Err(ClientError::Status {
                peer: peer.to_string(),
                status: StatusCode::BAD_GATEWAY,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for MockClient {
    async fn fetch_chain(&self, peer: &str) -> Result<Chain, ClientError> {
        self.gate(peer).await?;
        let chain = self.chains.lock().unwrap().get(peer).cloned();
        chain.ok_or_else(|| ClientError::Status {
            peer: peer.to_string(),
            status: StatusCode::NOT_FOUND,
        })
    }

    async fn push_transactions(
        &self,
        peer: &str,
        transactions: &[Transaction],
    ) -> Result<(), ClientError> {
        self.gate(peer).await?;
        self.pushes
            .lock()
            .unwrap()
            .push((peer.to_string(), transactions.to_vec()));
        Ok(())
    }
}

pub fn test_config(difficulty: usize) -> NodeConfig {
    NodeConfig {
        difficulty,
        sync_interval: Duration::from_secs(3600),
        peer_timeout: Duration::from_millis(300),
        ..NodeConfig::default()
    }
}

pub fn node_with_store(
    client: Arc<dyn PeerClient>,
    store: Arc<dyn LedgerStore>,
    difficulty: usize,
) -> Arc<Node> {
    let ledger = Arc::new(Ledger::open(Arc::clone(&store), difficulty).unwrap());
    let peers = Arc::new(PeerRegistry::open(store).unwrap());
    Arc::new(Node::new(ledger, peers, client, &test_config(difficulty)))
}

pub fn node(client: Arc<dyn PeerClient>) -> Arc<Node> {
    node_with_store(client, Arc::new(MemoryStore::new()), DIFFICULTY)
}

/// Extends `chain` with mined blocks until it holds `len` blocks.
pub fn extend(mut chain: Chain, len: usize, tag: &str) -> Chain {
    while chain.len() < len {
        let tip = chain.last().unwrap();
        let txs = vec![Transaction::new(tag, "miner", chain.len() as u64)];
        let candidate = Block::candidate(tip.index + 1, tip.hash.clone(), txs);
        chain.push(mine_uncancelled(candidate, DIFFICULTY));
    }
    chain
}

pub fn fresh_chain(len: usize, tag: &str) -> Chain {
    extend(vec![mine_genesis(DIFFICULTY)], len, tag)
}

/// Polls `check` for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
