use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use powchain_core::{Ledger, PeerRegistry};
use powchain_node::{api, Args, HttpPeerClient, Node, NodeConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::try_from(Args::parse())?;
    let store = config.open_store()?;
    let ledger = Arc::new(
        Ledger::open(Arc::clone(&store), config.difficulty).context("opening ledger")?,
    );
    let peers = Arc::new(PeerRegistry::open(store).context("opening peer registry")?);
    for peer in &config.seed_peers {
        if let Err(err) = peers.add(peer) {
            warn!(%peer, %err, "ignoring seed peer");
        }
    }

    let client = Arc::new(HttpPeerClient::new(config.peer_timeout)?);
    let node = Arc::new(Node::new(ledger, peers, client, &config));

    let shutdown = CancellationToken::new();
    let sync = node.spawn_sync(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        let node = Arc::clone(&node);
        async move { node.shutdown_on(tokio::signal::ctrl_c(), shutdown).await }
    });

    let listener = TcpListener::bind(config.listen).await?;
    info!(
        difficulty = config.difficulty,
        height = node.ledger().len().saturating_sub(1),
        "powchain-node listening on http://{}",
        listener.local_addr()?
    );
    api::serve(listener, Arc::clone(&node), shutdown.clone()).await?;

    shutdown.cancel();
    sync.await?;
    Ok(())
}
