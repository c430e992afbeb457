//! Round engine: admission, settlement, and payout for the raffle.
//!
//! `Lottery` is the one explicitly constructed context that owns every
//! component. Nothing in the engine is global; the binary, the HTTP layer,
//! and tests all hold an `Arc<Lottery>`.

pub mod broadcaster;
pub mod gate;
pub mod ledger;
pub mod payout;
pub mod selector;
pub mod timer;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::gateway::{InvoiceState, PaymentGateway};
use crate::types::{LottoError, PayoutStatus, RoundSnapshot, WinnerRecord};
use broadcaster::{EntryStream, TicketBroadcaster};
use gate::{ConfirmationGate, PendingEntry};
use ledger::RoundLedger;
use payout::PayoutDispatcher;
use timer::RoundTimer;

/// Outcome of closing a round that had entries.
#[derive(Debug)]
pub struct Settlement {
    pub record: WinnerRecord,
    /// Background payout task; `None` when nothing is sent (house win).
    pub payout: Option<JoinHandle<PayoutStatus>>,
}

pub struct Lottery {
    ledger: Arc<RoundLedger>,
    gate: ConfirmationGate,
    payouts: PayoutDispatcher,
    timer: RoundTimer,
    shutdown: watch::Sender<bool>,
}

impl Lottery {
    pub fn new(config: &AppConfig, gateway: Arc<dyn PaymentGateway>) -> Self {
        let lottery = &config.lottery;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let broadcaster = Arc::new(TicketBroadcaster::new(lottery.subscriber_queue_capacity));
        let ledger = Arc::new(
            RoundLedger::new(lottery.round_duration(), lottery.payout_ratio, broadcaster)
                .with_house_node(lottery.house_node_id.clone()),
        );
        let gate = ConfirmationGate::new(
            Arc::clone(&gateway),
            Arc::clone(&ledger),
            lottery.entry_policy(),
            lottery.settlement_timeout(),
            shutdown_rx.clone(),
        );
        let payouts = PayoutDispatcher::new(gateway, Arc::clone(&ledger), &config.payout, shutdown_rx);

        Self {
            ledger,
            gate,
            payouts,
            timer: RoundTimer::new(lottery.round_duration()),
            shutdown,
        }
    }

    pub fn ledger(&self) -> &Arc<RoundLedger> {
        &self.ledger
    }

    /// Validate and invoice an entry; it is admitted once the invoice settles.
    pub async fn request_entry(
        &self,
        participant_id: &str,
        amount: u64,
    ) -> Result<PendingEntry, LottoError> {
        self.gate.request_entry(participant_id, amount).await
    }

    pub async fn snapshot(&self) -> RoundSnapshot {
        self.ledger.snapshot().await
    }

    /// Live admitted entries, starting with the active round's replay.
    pub async fn subscribe_entries(&self) -> EntryStream {
        self.ledger.subscribe().await
    }

    /// Wait for an invoice issued by `request_entry` to settle or cancel.
    pub async fn watch_invoice(&self, handle: &str) -> Result<InvoiceState, LottoError> {
        self.gate.wait_for_invoice(handle).await
    }

    /// Close the active round, draw a winner, and start the payout.
    pub async fn settle_round(&self) -> Option<Settlement> {
        let record = self.ledger.settle().await?;

        if record.payout_status == PayoutStatus::Retained {
            info!(round = record.round_index, pot = record.pot, "House node won, pot retained");
            return Some(Settlement {
                record,
                payout: None,
            });
        }

        let payout = self.payouts.dispatch(&record);
        Some(Settlement {
            record,
            payout: Some(payout),
        })
    }

    /// Start the round timer; each tick settles the active round.
    pub fn spawn_timer(self: &Arc<Self>) -> JoinHandle<u64> {
        let lottery = Arc::clone(self);
        let shutdown = self.shutdown_signal();
        tokio::spawn(self.timer.run(
            move || {
                let lottery = Arc::clone(&lottery);
                async move {
                    // The payout task runs on by itself.
                    let _ = lottery.settle_round().await;
                }
            },
            shutdown,
        ))
    }

    /// Signal every gate, payout, and timer task to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        info!("Shutdown signalled");
    }

    /// Receiver that flips to true on `shutdown`.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
