use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::error::PeerError;
use crate::store::LedgerStore;

/// Insertion-ordered set of peer base URLs, persisted after every change.
///
/// Addresses are not checked for reachability; the synchronizer and
/// broadcaster skip peers that cannot be reached.
pub struct PeerRegistry<S: LedgerStore + ?Sized = dyn LedgerStore> {
    peers: RwLock<Vec<String>>,
    store: Arc<S>,
}

/// Trims whitespace and trailing slashes so `http://a:1/` and `http://a:1` are one peer.
pub fn normalize_address(address: &str) -> Result<String, PeerError> {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PeerError::EmptyAddress);
    }
    Ok(trimmed.to_string())
}

impl<S: LedgerStore + ?Sized> PeerRegistry<S> {
    pub fn open(store: Arc<S>) -> Result<Self> {
        let mut peers: Vec<String> = Vec::new();
        for stored in store.load_peers().context("loading peer list")? {
            if let Ok(address) = normalize_address(&stored) {
                if !peers.contains(&address) {
                    peers.push(address);
                }
            }
        }
        info!(count = peers.len(), "loaded peers");
        Ok(Self {
            peers: RwLock::new(peers),
            store,
        })
    }

    /// Returns `Ok(false)` when the peer was already registered.
    pub fn add(&self, address: &str) -> Result<bool, PeerError> {
        let address = normalize_address(address)?;
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.contains(&address) {
            return Ok(false);
        }
        peers.push(address.clone());
        self.persist(&peers);
        info!(peer = %address, "peer added");
        Ok(true)
    }

    /// Returns whether the peer was present.
    pub fn remove(&self, address: &str) -> bool {
        let Ok(address) = normalize_address(address) else {
            return false;
        };
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let before = peers.len();
        peers.retain(|p| *p != address);
        if peers.len() == before {
            return false;
        }
        self.persist(&peers);
        info!(peer = %address, "peer removed");
        true
    }

    pub fn list(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Called with the write lock held so snapshots reach the store in mutation order.
    fn persist(&self, peers: &[String]) {
        if let Err(err) = self.store.save_peers(peers) {
            error!(error = ?err, "failed to persist peer list");
        }
    }
}
