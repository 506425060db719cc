// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, Signature};
use alloy_sol_types::Eip712Domain;
use app_core::runtime::Withdrawal;
use app_core::{RuntimeCall, Transaction};
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Json, Path as UrlPath, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::block::UnprovenBlock;
use crate::block_stream::LiveSubscription;
use crate::context::Sequencer;
use crate::query::{QueryResult, QueryView};
use crate::settlement::OutgoingMessage;
use crate::storage::{HistoricalUnprovenBlockStorage, UnprovenBlockStorage};

pub use error::ApiError;

const DEFAULT_WITHDRAWAL_PAGE: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub sequencer: Arc<Sequencer>,
    pub domain: Eip712Domain,
}

#[derive(Debug, Deserialize)]
struct TxRequest {
    message: RuntimeCall,
    signature: String,
    sender: Option<String>,
}

#[derive(Debug, Serialize)]
struct TxResponse {
    ok: bool,
    tx_hash: String,
    sender: String,
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct StateQuery {
    key: Option<String>,
    #[serde(default)]
    view: QueryView,
}

#[derive(Debug, Deserialize)]
struct WithdrawalsQuery {
    limit: Option<usize>,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/tx", post(submit_tx))
        .route("/blocks/latest", get(latest_block))
        .route("/blocks/{height}", get(block_at))
        .route("/query/{module}/{field}", get(query_state))
        .route("/withdrawals", get(pending_withdrawals))
        .route("/ws/blocks", get(subscribe_blocks))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn submit_tx(
    State(state): State<Arc<AppState>>,
    req: Result<Json<TxRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<TxResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;

    let signature_bytes = decode_hex_0x(&req.signature).map_err(ApiError::bad_request)?;
    if signature_bytes.len() != Transaction::SIGNATURE_BYTES {
        return Err(ApiError::bad_request("signature must be 65 bytes"));
    }
    let signature = parse_signature(&signature_bytes)?;

    let call = req.message;
    if call.args.len() > Transaction::MAX_ARGS_BYTES {
        return Err(ApiError::bad_request(format!(
            "call args too large: max {} bytes, got {} bytes",
            Transaction::MAX_ARGS_BYTES,
            call.args.len()
        )));
    }

    let mut tx = Transaction {
        sender: Address::ZERO,
        call,
        signature: Bytes::from(signature_bytes),
    };
    let signing_hash = tx.signing_hash(&state.domain);
    tx.sender = signature
        .recover_address_from_prehash(&signing_hash)
        .map_err(|_| ApiError::invalid_signature("cannot recover sender"))?;

    if let Some(sender_hex) = req.sender.as_deref() {
        let expected = parse_address(sender_hex).map_err(ApiError::bad_request)?;
        if expected != tx.sender {
            return Err(ApiError::invalid_signature("sender mismatch"));
        }
    }

    let sender = tx.sender;
    let nonce = tx.nonce();
    let tx_hash = state.sequencer.submit(tx)?;
    info!(tx_hash = %encode_hex(&tx_hash), sender = %sender, nonce, "tx accepted");

    Ok(Json(TxResponse {
        ok: true,
        tx_hash: encode_hex(&tx_hash),
        sender: sender.to_string(),
        nonce,
    }))
}

async fn latest_block(State(state): State<Arc<AppState>>) -> Result<Json<UnprovenBlock>, ApiError> {
    let block = state
        .sequencer
        .block_storage()
        .get_latest_block()
        .await
        .map_err(|err| ApiError::internal_error(err.to_string()))?
        .ok_or_else(|| ApiError::not_found("no block produced yet"))?;
    Ok(Json(UnprovenBlock::clone(&block)))
}

async fn block_at(
    State(state): State<Arc<AppState>>,
    UrlPath(height): UrlPath<u64>,
) -> Result<Json<UnprovenBlock>, ApiError> {
    let block = state
        .sequencer
        .block_storage()
        .get_block_at(height)
        .await
        .map_err(|err| ApiError::internal_error(err.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("no block at height {height}")))?;
    Ok(Json(UnprovenBlock::clone(&block)))
}

async fn query_state(
    State(state): State<Arc<AppState>>,
    UrlPath((module, field)): UrlPath<(String, String)>,
    Query(params): Query<StateQuery>,
) -> Result<Json<QueryResult>, ApiError> {
    let key = params
        .key
        .as_deref()
        .map(decode_hex_0x)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let result = state
        .sequencer
        .query(params.view, &module, &field, key.as_deref())
        .await?;
    Ok(Json(result))
}

async fn pending_withdrawals(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WithdrawalsQuery>,
) -> Json<Vec<OutgoingMessage<Withdrawal>>> {
    let limit = params.limit.unwrap_or(DEFAULT_WITHDRAWAL_PAGE);
    Json(state.sequencer.withdrawals().peek(limit).await)
}

async fn subscribe_blocks(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    // Register before upgrading so no block produced after the handshake is missed.
    let subscription = state.sequencer.block_stream().subscribe();
    ws.on_upgrade(move |socket| forward_blocks(socket, subscription))
}

async fn forward_blocks(mut socket: WebSocket, mut subscription: LiveSubscription) {
    debug!(live_start_height = subscription.live_start_height, "block subscriber connected");
    while let Some(message) = subscription.receiver.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, height = message.height, "cannot encode block message");
                continue;
            }
        };
        if socket.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    debug!("block subscriber disconnected");
}

fn decode_hex_0x(value: &str) -> Result<Vec<u8>, String> {
    if !value.starts_with("0x") {
        return Err("hex string must start with 0x".to_string());
    }
    alloy_primitives::hex::decode(value).map_err(|err| format!("invalid hex: {err}"))
}

fn parse_address(value: &str) -> Result<Address, String> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 20 {
        return Err("address must be 20 bytes".to_string());
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_signature(bytes: &[u8]) -> Result<Signature, ApiError> {
    Signature::from_raw(bytes).map_err(|err| match err {
        alloy_primitives::SignatureError::FromBytes(_) => {
            ApiError::bad_request("signature must be 65 bytes")
        }
        alloy_primitives::SignatureError::FromHex(_) => {
            ApiError::bad_request("invalid signature hex")
        }
        alloy_primitives::SignatureError::InvalidParity(_) => {
            ApiError::invalid_signature("invalid signature parity")
        }
        alloy_primitives::SignatureError::K256(_) => {
            ApiError::invalid_signature("invalid signature")
        }
    })
}

fn encode_hex(value: &B256) -> String {
    alloy_primitives::hex::encode_prefixed(value.as_slice())
}
