use std::{future::Future, time::Duration};

use async_trait::async_trait;
use powchain_core::{Chain, Transaction};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::api::SubmitRequest;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {peer} failed: {source}")]
    Request {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{peer} answered with status {status}")]
    Status { peer: String, status: StatusCode },

    #[error("{peer} did not answer within {after:?}")]
    Timeout { peer: String, after: Duration },
}

/// Outbound calls a node makes to its peers.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Ask a remote ledger for its whole chain.
    async fn fetch_chain(&self, peer: &str) -> Result<Chain, ClientError>;

    /// Ask a remote ledger to mine and append a block with these transactions.
    async fn push_transactions(
        &self,
        peer: &str,
        transactions: &[Transaction],
    ) -> Result<(), ClientError>;
}

/// Runs a peer call with an upper bound on its duration.
pub async fn bounded<T, F>(peer: &str, after: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            peer: peer.to_string(),
            after,
        }),
    }
}

/// `PeerClient` speaking the node's own JSON API.
#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    http: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

fn request_error(peer: &str, source: reqwest::Error) -> ClientError {
    ClientError::Request {
        peer: peer.to_string(),
        source,
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<Chain, ClientError> {
        let res = self
            .http
            .get(format!("{peer}/blocks"))
            .send()
            .await
            .map_err(|e| request_error(peer, e))?;
        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                peer: peer.to_string(),
                status,
            });
        }
        res.json::<Chain>().await.map_err(|e| request_error(peer, e))
    }

    async fn push_transactions(
        &self,
        peer: &str,
        transactions: &[Transaction],
    ) -> Result<(), ClientError> {
        let body = SubmitRequest {
            transactions: transactions.to_vec(),
            relay: true,
        };
        let res = self
            .http
            .post(format!("{peer}/blocks/create"))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(peer, e))?;
        match res.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(ClientError::Status {
                peer: peer.to_string(),
                status,
            }),
        }
    }
}
