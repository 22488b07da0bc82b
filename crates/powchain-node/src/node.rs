use std::{future::Future, io, sync::Arc};

use powchain_core::{
    pow::{self, MiningEpoch},
    Block, Chain, Ledger, PeerError, PeerRegistry, Transaction,
};
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broadcast::Broadcaster;
use crate::client::PeerClient;
use crate::config::NodeConfig;
use crate::sync::Synchronizer;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a submission needs at least one transaction")]
    EmptyTransactions,

    #[error("block {index} was rejected: the chain tip moved while it was mined")]
    Rejected { index: u64 },

    #[error("mining was cancelled")]
    Cancelled,

    #[error("mining worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// The ledger node's operations, independent of any transport.
pub struct Node {
    ledger: Arc<Ledger>,
    peers: Arc<PeerRegistry>,
    broadcaster: Broadcaster,
    sync: Arc<Synchronizer>,
    mining: Arc<MiningEpoch>,
}

impl Node {
    pub fn new(
        ledger: Arc<Ledger>,
        peers: Arc<PeerRegistry>,
        client: Arc<dyn PeerClient>,
        config: &NodeConfig,
    ) -> Self {
        let mining = Arc::new(MiningEpoch::default());
        let broadcaster = Broadcaster::new(
            Arc::clone(&client),
            config.max_broadcasts,
            config.peer_timeout,
        );
        let sync = Arc::new(Synchronizer::new(
            Arc::clone(&ledger),
            Arc::clone(&peers),
            client,
            Arc::clone(&mining),
            config.sync_interval,
            config.peer_timeout,
        ));
        Self {
            ledger,
            peers,
            broadcaster,
            sync,
            mining,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    /// Starts the periodic sync loop.
    pub fn spawn_sync(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.sync).run(shutdown))
    }

    pub fn get_chain(&self) -> Arc<Chain> {
        self.ledger.snapshot()
    }

    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.ledger.block(index)
    }

    /// Mines a block with `transactions` on top of the current tip and appends it.
    ///
    /// Mining runs on a blocking worker, outside every lock. `relay` marks a
    /// submission pushed by another peer: the resulting block is announced to
    /// local subscribers but not pushed on to peers again.
    pub async fn submit_transactions(
        &self,
        transactions: Vec<Transaction>,
        relay: bool,
    ) -> Result<Block, SubmitError> {
        if transactions.is_empty() {
            return Err(SubmitError::EmptyTransactions);
        }

        let candidate = self.ledger.candidate(transactions);
        let index = candidate.index;
        let difficulty = self.ledger.difficulty();
        let token = self.mining.token();
        let ledger = Arc::clone(&self.ledger);
        let peers = Arc::clone(&self.peers);
        let broadcaster = self.broadcaster.clone();
        debug!(index, difficulty, relay, "mining candidate block");

        // Detached, so a dropped caller never separates an append from its announcement.
        let job = tokio::spawn(async move {
            let block = tokio::task::spawn_blocking(move || {
                let block =
                    pow::mine(candidate, difficulty, &token).ok_or(SubmitError::Cancelled)?;
                if ledger.append(block.clone()) {
                    Ok(block)
                } else {
                    Err(SubmitError::Rejected { index })
                }
            })
            .await??;

            let targets = if relay { Vec::new() } else { peers.list() };
            broadcaster.announce(&block, targets);
            Ok::<_, SubmitError>(block)
        });
        job.await?
    }

    /// Registers a peer and asks for an immediate sync. `Ok(false)` if it was already known.
    pub fn add_peer(&self, address: &str) -> Result<bool, PeerError> {
        let added = self.peers.add(address)?;
        self.sync.trigger();
        Ok(added)
    }

    pub fn remove_peer(&self, address: &str) -> bool {
        let removed = self.peers.remove(address);
        self.sync.trigger();
        removed
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.list()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcaster.subscribe()
    }

    /// Aborts in-flight mining; later submissions fail with [`SubmitError::Cancelled`].
    pub fn shutdown(&self) {
        info!("cancelling in-flight mining");
        self.mining.shutdown();
    }

    /// Waits for `signal`, then shuts mining down and cancels `token`.
    ///
    /// If the signal cannot be listened for, the node keeps running.
    pub async fn shutdown_on<F>(&self, signal: F, token: CancellationToken)
    where
        F: Future<Output = io::Result<()>>,
    {
        if let Err(err) = signal.await {
            error!(%err, "cannot listen for the shutdown signal; stop the node by other means");
            return;
        }
        info!("shutdown requested");
        self.shutdown();
        token.cancel();
    }
}
