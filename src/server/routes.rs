//! HTTP and websocket route handlers.
//!
//! JSON endpoints plus two websocket feeds. State is the shared
//! `Arc<Lottery>`; handlers never touch engine internals directly.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::Lottery;
use crate::gateway::InvoiceState;
use crate::types::{LottoError, RoundSnapshot};

pub type AppState = Arc<Lottery>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EntryRequestBody {
    pub participant_id: String,
    pub amount: u64,
}

/// Returned with `402 Payment Required` until the invoice is paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInvoiceResponse {
    pub handle: String,
    pub payment_request: String,
    pub participant_id: String,
    pub amount: u64,
    pub time_left_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps engine errors onto HTTP status codes.
pub struct ApiError(LottoError);

impl From<LottoError> for ApiError {
    fn from(e: LottoError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LottoError::Validation(_) => StatusCode::BAD_REQUEST,
            LottoError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            LottoError::SettlementTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LottoError::SettlementFailed { .. } => StatusCode::BAD_GATEWAY,
            LottoError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LottoError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

// ---------------------------------------------------------------------------
// JSON handlers
// ---------------------------------------------------------------------------

/// GET /api/snapshot
pub async fn get_snapshot(State(lottery): State<AppState>) -> Json<RoundSnapshot> {
    Json(lottery.snapshot().await)
}

/// POST /api/entries
pub async fn request_entry(
    State(lottery): State<AppState>,
    Json(body): Json<EntryRequestBody>,
) -> Result<(StatusCode, Json<EntryInvoiceResponse>), ApiError> {
    let pending = lottery.request_entry(&body.participant_id, body.amount).await?;
    let time_left_ms = lottery.ledger().time_left().await.as_millis() as u64;

    // The gate keeps running after `pending` is dropped.
    Ok((
        StatusCode::PAYMENT_REQUIRED,
        Json(EntryInvoiceResponse {
            handle: pending.invoice.handle.clone(),
            payment_request: pending.invoice.payment_request.clone(),
            participant_id: pending.entry.participant_id.clone(),
            amount: pending.entry.amount,
            time_left_ms,
        }),
    ))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Websocket handlers
// ---------------------------------------------------------------------------

/// GET /ws/entries: replay of the active round, then every new entry.
pub async fn stream_entries(ws: WebSocketUpgrade, State(lottery): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward_entries(socket, lottery))
}

async fn forward_entries(mut socket: WebSocket, lottery: AppState) {
    let mut entries = lottery.subscribe_entries().await;
    let mut shutdown = lottery.shutdown_signal();
    debug!(subscriber = entries.id(), "Entry stream opened");

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            next = entries.recv() => {
                let Some(entry) = next else { break };
                let json = match serde_json::to_string(&entry) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode entry");
                        break;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    entries.close();
    debug!(subscriber = entries.id(), "Entry stream closed");
}

/// GET /ws/invoices/:handle: sends "Paid" once the invoice settles.
pub async fn watch_invoice(
    ws: WebSocketUpgrade,
    Path(handle): Path<String>,
    State(lottery): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| report_invoice(socket, lottery, handle))
}

async fn report_invoice(mut socket: WebSocket, lottery: AppState, handle: String) {
    let message = match lottery.watch_invoice(&handle).await {
        Ok(InvoiceState::Settled) => "Paid".to_string(),
        Ok(state) => state.to_string(),
        Err(e) => {
            warn!(handle = %handle, error = %e, "Invoice watch failed");
            format!("ERROR {e}")
        }
    };
    if let Err(e) = socket.send(Message::Text(message)).await {
        debug!(handle = %handle, error = %e, "Invoice watcher went away");
    }
    let _ = socket.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
