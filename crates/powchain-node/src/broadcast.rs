use std::{sync::Arc, time::Duration};

use powchain_core::{Block, Transaction};
use tokio::{
    sync::{broadcast, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn};

use crate::client::{bounded, PeerClient};
use crate::constants::SUBSCRIBER_CAPACITY;

/// Best-effort fan-out of accepted blocks to local subscribers and to peers.
///
/// Peer pushes run concurrently, at most `max_in_flight` at a time, each
/// bounded by `timeout`. Failures are logged and never retried.
#[derive(Clone)]
pub struct Broadcaster {
    client: Arc<dyn PeerClient>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    subscribers: broadcast::Sender<String>,
}

/// Notification text sent to subscribers for an accepted block.
pub fn describe(block: &Block) -> String {
    format!(
        "new block added: index {} with {} transaction(s), hash {}",
        block.index,
        block.transactions.len(),
        block.hash
    )
}

impl Broadcaster {
    pub fn new(client: Arc<dyn PeerClient>, max_in_flight: usize, timeout: Duration) -> Self {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout,
            subscribers,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.subscribers.subscribe()
    }

    /// Notifies subscribers right away and pushes the block's transactions to `peers`
    /// in the background. The handle resolves once every push finished or failed;
    /// callers are free to drop it.
    pub fn announce(&self, block: &Block, peers: Vec<String>) -> JoinHandle<()> {
        match self.subscribers.send(describe(block)) {
            Ok(receivers) => debug!(index = block.index, receivers, "notified subscribers"),
            Err(_) => debug!(index = block.index, "no subscribers to notify"),
        }

        let index = block.index;
        let transactions: Arc<[Transaction]> = block.transactions.clone().into();
        let client = Arc::clone(&self.client);
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut pushes = JoinSet::new();
            for peer in peers {
                let client = Arc::clone(&client);
                let permits = Arc::clone(&permits);
                let transactions = Arc::clone(&transactions);
                pushes.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let push = client.push_transactions(&peer, &transactions);
                    match bounded(&peer, timeout, push).await {
                        Ok(()) => debug!(%peer, index, "pushed block to peer"),
                        Err(err) => warn!(%peer, index, %err, "failed to push block to peer"),
                    }
                });
            }
            while let Some(joined) = pushes.join_next().await {
                if let Err(err) = joined {
                    warn!(index, %err, "peer push task aborted");
                }
            }
        })
    }
}
