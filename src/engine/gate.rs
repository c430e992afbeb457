//! Confirmation gate: admission behind payment confirmation.
//!
//! Each entry request walks `Requested → AwaitingSettlement → Admitted |
//! Rejected`. Validation and invoice creation happen inline so their errors
//! reach the requester; waiting for the invoice to settle happens in a
//! background task that holds no ledger lock until the moment it admits.
//!
//! The entry lands in whichever round is active when the invoice settles,
//! which may be later than the round active at request time.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::ledger::RoundLedger;
use crate::gateway::{Invoice, InvoiceState, PaymentGateway};
use crate::types::{Entry, EntryPolicy, LottoError};

// ---------------------------------------------------------------------------
// Gate states
// ---------------------------------------------------------------------------

/// Why a gated entry was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Canceled,
    Timeout,
    /// The settlement stream ended or broke before a terminal state.
    StreamLost(String),
    Shutdown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Canceled => write!(f, "invoice canceled"),
            RejectReason::Timeout => write!(f, "settlement timeout"),
            RejectReason::StreamLost(msg) => write!(f, "settlement stream lost: {msg}"),
            RejectReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Lifecycle of a single entry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Requested,
    AwaitingSettlement,
    Admitted { round: u64 },
    Rejected(RejectReason),
}

/// An entry waiting on its invoice.
#[derive(Debug)]
pub struct PendingEntry {
    pub entry: Entry,
    pub invoice: Invoice,
    state: watch::Receiver<GateState>,
    task: JoinHandle<GateState>,
}

impl PendingEntry {
    /// Current gate state, without waiting.
    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Wait for the gate to reach a terminal state.
    ///
    /// Dropping a `PendingEntry` instead detaches the gate; it still runs.
    pub async fn outcome(self) -> GateState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => GateState::Rejected(RejectReason::StreamLost(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ConfirmationGate {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<RoundLedger>,
    policy: EntryPolicy,
    settlement_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ConfirmationGate {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<RoundLedger>,
        policy: EntryPolicy,
        settlement_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            policy,
            settlement_timeout,
            shutdown,
        }
    }

    /// Validate, issue an invoice, and start waiting for its settlement.
    pub async fn request_entry(
        &self,
        participant_id: &str,
        amount: u64,
    ) -> Result<PendingEntry, LottoError> {
        debug!(participant_id, amount, state = ?GateState::Requested, "Entry requested");
        let entry = self.policy.validate(participant_id, amount).map_err(|e| {
            debug!(participant_id, amount, error = %e, "Entry request rejected");
            e
        })?;

        let invoice = self
            .gateway
            .create_invoice(entry.amount)
            .await
            .map_err(|e| LottoError::gateway("create_invoice", e))?;
        let updates = self
            .gateway
            .subscribe_settlement(&invoice.handle)
            .await
            .map_err(|e| LottoError::gateway("subscribe_settlement", e))?;

        info!(
            participant_id = %entry.participant_id,
            amount = entry.amount,
            handle = %invoice.handle,
            "Awaiting settlement"
        );

        let (state_tx, state) = watch::channel(GateState::AwaitingSettlement);
        let gate = self.clone();
        let (e, h) = (entry.clone(), invoice.handle.clone());
        let task = tokio::spawn(async move {
            let outcome = gate.await_settlement(e, h, updates).await;
            state_tx.send_replace(outcome.clone());
            outcome
        });

        Ok(PendingEntry {
            entry,
            invoice,
            state,
            task,
        })
    }

    async fn await_settlement(
        &self,
        entry: Entry,
        handle: String,
        updates: BoxStream<'static, anyhow::Result<InvoiceState>>,
    ) -> GateState {
        let mut shutdown = self.shutdown.clone();
        let waited = tokio::select! {
            r = tokio::time::timeout(self.settlement_timeout, terminal_state(updates)) => r,
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!(handle = %handle, "Gate stopped by shutdown");
                return GateState::Rejected(RejectReason::Shutdown);
            }
        };

        let state = match waited {
            Ok(Ok(InvoiceState::Settled)) => {
                let round = self.ledger.admit(entry.clone()).await;
                GateState::Admitted { round }
            }
            Ok(Ok(_)) => GateState::Rejected(RejectReason::Canceled),
            Ok(Err(reason)) => GateState::Rejected(reason),
            Err(_) => GateState::Rejected(RejectReason::Timeout),
        };

        match &state {
            GateState::Admitted { round } => info!(
                handle = %handle,
                participant_id = %entry.participant_id,
                round,
                "Invoice settled, entry admitted"
            ),
            GateState::Rejected(reason) => warn!(
                handle = %handle,
                participant_id = %entry.participant_id,
                reason = %reason,
                "Entry discarded"
            ),
            _ => {}
        }
        state
    }

    /// Wait until an invoice reaches a terminal state.
    pub async fn wait_for_invoice(&self, handle: &str) -> Result<InvoiceState, LottoError> {
        let updates = self
            .gateway
            .subscribe_settlement(handle)
            .await
            .map_err(|e| LottoError::gateway("subscribe_settlement", e))?;

        let mut shutdown = self.shutdown.clone();
        let waited = tokio::select! {
            r = tokio::time::timeout(self.settlement_timeout, terminal_state(updates)) => r,
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!(handle, "Invoice watch stopped by shutdown");
                return Err(LottoError::ShuttingDown);
            }
        };

        match waited {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(reason)) => Err(LottoError::SettlementFailed {
                handle: handle.to_string(),
                reason: reason.to_string(),
            }),
            Err(_) => Err(LottoError::SettlementTimeout {
                handle: handle.to_string(),
                secs: self.settlement_timeout.as_secs(),
            }),
        }
    }
}

/// Consume invoice updates until `Settled` or `Canceled`.
async fn terminal_state(
    mut updates: BoxStream<'static, anyhow::Result<InvoiceState>>,
) -> Result<InvoiceState, RejectReason> {
    while let Some(update) = updates.next().await {
        match update {
            Ok(state) if state.is_terminal() => return Ok(state),
            Ok(_) => {}
            Err(e) => return Err(RejectReason::StreamLost(e.to_string())),
        }
    }
    Err(RejectReason::StreamLost("stream ended".into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
