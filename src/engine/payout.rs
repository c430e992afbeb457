//! Payout dispatcher.
//!
//! Sends the winner's keysend payment and follows it to a terminal state
//! in a background task. No retries: a failed or timed-out payout is
//! logged and recorded on the winner record, nothing more.

use futures::StreamExt;
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::PayoutConfig;
use crate::engine::ledger::RoundLedger;
use crate::gateway::{PaymentGateway, PaymentRequest, PaymentState};
use crate::types::{PayoutStatus, WinnerRecord};

/// Amount paid to the winner of a pot after the house fee (rounded down).
pub fn payout_size(pot: u64, payout_ratio: Decimal) -> u64 {
    (Decimal::from(pot) * payout_ratio)
        .floor()
        .to_u64()
        .unwrap_or(0)
        .min(pot)
}

/// Routing fee ceiling for a payout of `amount` sats (rounded down).
pub fn fee_ceiling(amount: u64, max_fee_ratio: Decimal) -> u64 {
    (Decimal::from(amount) * max_fee_ratio)
        .floor()
        .to_u64()
        .unwrap_or(0)
}

/// Fire-and-forget sender of winner payouts.
#[derive(Clone)]
pub struct PayoutDispatcher {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<RoundLedger>,
    max_fee_ratio: Decimal,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl PayoutDispatcher {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<RoundLedger>,
        config: &PayoutConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            max_fee_ratio: config.max_fee_ratio,
            timeout: config.timeout(),
            shutdown,
        }
    }

    /// Pay `record`'s winner in the background.
    ///
    /// The terminal status is written back onto the winner record. If the
    /// process shuts down first, the record is left `Pending`.
    pub fn dispatch(&self, record: &WinnerRecord) -> JoinHandle<PayoutStatus> {
        let this = self.clone();
        let round = record.round_index;
        let request = PaymentRequest {
            target: record.participant_id.clone(),
            amount: record.payout_amount,
            max_fee: fee_ceiling(record.payout_amount, self.max_fee_ratio),
            timeout: self.timeout,
        };

        tokio::spawn(async move {
            let mut shutdown = this.shutdown.clone();
            let outcome = tokio::select! {
                status = this.send_and_monitor(round, request) => Some(status),
                _ = shutdown.wait_for(|stop| *stop) => None,
            };

            match outcome {
                Some(status) => {
                    this.ledger.record_payout_status(round, status).await;
                    status
                }
                None => {
                    warn!(round, "Shutdown before payout reached a terminal state");
                    PayoutStatus::Pending
                }
            }
        })
    }

    async fn send_and_monitor(&self, round: u64, request: PaymentRequest) -> PayoutStatus {
        let target = request.target.clone();
        let amount = request.amount;

        if amount == 0 {
            warn!(round, target_node = %target, "Payout rounds to zero, nothing sent");
            return PayoutStatus::Failed;
        }

        let monitor = async {
            let mut updates = match self.gateway.send_payment(request).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!(round, target_node = %target, error = %e, "Payout dispatch failed");
                    return PayoutStatus::Failed;
                }
            };

            while let Some(update) = updates.next().await {
                match update {
                    Ok(PaymentState::InFlight) => {
                        info!(round, target_node = %target, "Payout in flight");
                    }
                    Ok(PaymentState::Succeeded) => {
                        info!(round, target_node = %target, amount, "Payout succeeded");
                        return PayoutStatus::Succeeded;
                    }
                    Ok(PaymentState::Failed) => {
                        warn!(round, target_node = %target, amount, "Payout failed");
                        return PayoutStatus::Failed;
                    }
                    Err(e) => {
                        error!(round, target_node = %target, error = %e, "Payout status stream error");
                        return PayoutStatus::Failed;
                    }
                }
            }

            warn!(round, target_node = %target, "Payout status stream ended without a result");
            PayoutStatus::Failed
        };

        match tokio::time::timeout(self.timeout, monitor).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    round,
                    target_node = %target,
                    timeout_secs = self.timeout.as_secs(),
                    "Payout timed out"
                );
                PayoutStatus::TimedOut
            }
        }
    }
}
