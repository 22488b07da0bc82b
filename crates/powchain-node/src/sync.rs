//! Longest-valid-chain synchronization with known peers.

use std::{sync::Arc, time::Duration};

use powchain_core::{pow::MiningEpoch, Ledger, PeerRegistry};
use tokio::{sync::Notify, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{bounded, PeerClient};

/// Outcome of one pass over the peer list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub polled: usize,
    pub unreachable: usize,
    pub replaced: bool,
}

pub struct Synchronizer {
    ledger: Arc<Ledger>,
    peers: Arc<PeerRegistry>,
    client: Arc<dyn PeerClient>,
    mining: Arc<MiningEpoch>,
    trigger: Notify,
    interval: Duration,
    timeout: Duration,
}

impl Synchronizer {
    pub fn new(
        ledger: Arc<Ledger>,
        peers: Arc<PeerRegistry>,
        client: Arc<dyn PeerClient>,
        mining: Arc<MiningEpoch>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            peers,
            client,
            mining,
            trigger: Notify::new(),
            interval,
            timeout,
        }
    }

    /// Asks the running loop for an immediate pass. Triggers issued during a
    /// pass are coalesced into one follow-up pass.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Fetches every peer's chain and adopts any strictly longer valid one.
    ///
    /// A peer that fails, times out or sends garbage is skipped; the rest of
    /// the list is still processed.
    pub async fn sync_once(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for peer in self.peers.list() {
            report.polled += 1;
            let chain = match bounded(&peer, self.timeout, self.client.fetch_chain(&peer)).await {
                Ok(chain) => chain,
                Err(err) => {
                    warn!(%peer, %err, "skipping peer");
                    report.unreachable += 1;
                    continue;
                }
            };

            let len = chain.len();
            let ledger = Arc::clone(&self.ledger);
            match tokio::task::spawn_blocking(move || ledger.replace_if_better(chain)).await {
                Ok(true) => {
                    info!(%peer, len, "adopted longer chain from peer");
                    report.replaced = true;
                    // Blocks being mined on the old tip can no longer be appended.
                    self.mining.restart();
                }
                Ok(false) => debug!(%peer, len, "kept local chain"),
                Err(err) => error!(%peer, %err, "chain replacement task failed"),
            }
        }
        report
    }

    fn check_integrity(&self) {
        match self.ledger.verify() {
            Ok(()) => debug!(height = self.ledger.len().saturating_sub(1), "ledger integrity check passed"),
            Err(err) => error!(%err, "ledger integrity check failed"),
        }
    }

    /// Runs a pass on every interval tick and on every trigger until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("synchronizer stopped");
                    return;
                }
                _ = ticker.tick() => self.check_integrity(),
                _ = self.trigger.notified() => debug!("sync pass triggered"),
            }
            let report = self.sync_once().await;
            debug!(?report, "sync pass finished");
        }
    }
}
