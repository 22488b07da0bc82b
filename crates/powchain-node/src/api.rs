use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use powchain_core::{Block, Chain, Transaction};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::node::{Node, SubmitError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub transactions: Vec<Transaction>,
    /// Set by peers relaying a block; such blocks are not pushed on again.
    #[serde(default)]
    pub relay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRequest {
    pub peer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerList {
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Head {
    pub height: u64,
    pub hash: Option<String>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct PeerChange<'a> {
    peer: &'a str,
    changed: bool,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let message = err.to_string();
        match err {
            SubmitError::EmptyTransactions => ApiError::BadRequest(message),
            SubmitError::Rejected { .. } => ApiError::Conflict(message),
            SubmitError::Cancelled => ApiError::Unavailable(message),
            SubmitError::Worker(_) => ApiError::Internal(message),
        }
    }
}

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chain/head", get(head))
        .route("/blocks", get(list_blocks))
        .route("/blocks/create", post(create_block))
        .route("/blocks/{index}", get(get_block))
        .route("/peers", get(list_peers))
        .route("/peers/add", post(add_peer))
        .route("/peers/remove", post(remove_peer))
        .route("/ws", get(subscribe))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    node: Arc<Node>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(node);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn head(State(node): State<Arc<Node>>) -> Json<Head> {
    let chain = node.get_chain();
    Json(Head {
        height: chain.len().saturating_sub(1) as u64,
        hash: chain.last().map(|b| b.hash.clone()),
    })
}

async fn list_blocks(State(node): State<Arc<Node>>) -> Json<Arc<Chain>> {
    Json(node.get_chain())
}

async fn get_block(
    State(node): State<Arc<Node>>,
    Path(index): Path<String>,
) -> Result<Json<Block>, ApiError> {
    let index: u64 = index
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid block index {index:?}")))?;
    node.get_block(index)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no block with index {index}")))
}

async fn create_block(
    State(node): State<Arc<Node>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Block>), ApiError> {
    let block = node.submit_transactions(req.transactions, req.relay).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn list_peers(State(node): State<Arc<Node>>) -> Json<PeerList> {
    Json(PeerList {
        peers: node.peers(),
    })
}

async fn add_peer(
    State(node): State<Arc<Node>>,
    Json(req): Json<PeerRequest>,
) -> Result<Response, ApiError> {
    let changed = node
        .add_peer(&req.peer)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    Ok(Json(PeerChange {
        peer: &req.peer,
        changed,
    })
    .into_response())
}

async fn remove_peer(
    State(node): State<Arc<Node>>,
    Json(req): Json<PeerRequest>,
) -> Response {
    let changed = node.remove_peer(&req.peer);
    Json(PeerChange {
        peer: &req.peer,
        changed,
    })
    .into_response()
}

async fn subscribe(ws: WebSocketUpgrade, State(node): State<Arc<Node>>) -> Response {
    // Subscribe before the upgrade completes so no block is missed in between.
    let notifications = node.subscribe();
    ws.on_upgrade(move |socket| push_notifications(socket, notifications))
}

async fn push_notifications(mut socket: WebSocket, mut notifications: broadcast::Receiver<String>) {
    info!("subscriber connected");
    loop {
        tokio::select! {
            note = notifications.recv() => match note {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagging; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // One-way channel: anything but a close frame is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("subscriber disconnected");
}
