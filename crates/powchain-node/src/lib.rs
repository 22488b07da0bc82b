//! HTTP node around the `powchain-core` ledger: peer sync, block fan-out and the JSON API.

pub mod api;
pub mod broadcast;
pub mod client;
pub mod config;
mod constants;
pub mod node;
pub mod sync;

pub use client::{ClientError, HttpPeerClient, PeerClient};
pub use config::{Args, NodeConfig, StorageKind};
pub use node::{Node, SubmitError};
