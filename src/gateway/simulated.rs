//! Simulated Lightning gateway.
//!
//! Issues invoices and pushes payments entirely in memory. Invoices can
//! settle on their own after a fixed delay (local demo runs) or be driven
//! by hand with `settle` / `cancel` (tests). Payments succeed unless the
//! gateway is configured to fail them.
//!
//! Only pending invoices hold a live channel. A final invoice is moved to a
//! bounded list of recent outcomes so late watchers still see it, and the
//! payment log keeps only the most recent payments.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Invoice, InvoiceState, PaymentGateway, PaymentRequest, PaymentState};

const GATEWAY_NAME: &str = "simulated";

/// Final invoice states kept for late subscribers.
const FINISHED_RETAINED: usize = 1024;
/// Payments kept in the log.
const PAYMENTS_RETAINED: usize = 256;

#[derive(Default)]
struct InvoiceBook {
    open: HashMap<String, watch::Sender<InvoiceState>>,
    finished: VecDeque<(String, InvoiceState)>,
}

type SharedBook = Arc<Mutex<InvoiceBook>>;

/// In-memory `PaymentGateway`.
pub struct SimulatedGateway {
    invoices: SharedBook,
    payments: Arc<Mutex<VecDeque<PaymentRequest>>>,
    auto_settle: Option<Duration>,
    fail_payments: bool,
}

impl SimulatedGateway {
    /// Invoices stay pending until `settle` or `cancel` is called.
    pub fn manual() -> Self {
        Self::new(None, false)
    }

    pub fn new(auto_settle: Option<Duration>, fail_payments: bool) -> Self {
        Self {
            invoices: Arc::new(Mutex::new(InvoiceBook::default())),
            payments: Arc::new(Mutex::new(VecDeque::new())),
            auto_settle,
            fail_payments,
        }
    }

    /// Build from the `[gateway]` config section.
    pub fn from_config(cfg: &crate::config::GatewayConfig) -> Self {
        let auto_settle = (cfg.auto_settle_ms > 0).then(|| Duration::from_millis(cfg.auto_settle_ms));
        Self::new(auto_settle, cfg.fail_payments)
    }

    /// Mark a pending invoice as paid. Returns false if unknown or already final.
    pub fn settle(&self, handle: &str) -> bool {
        transition(&self.invoices, handle, InvoiceState::Settled)
    }

    /// Cancel a pending invoice. Returns false if unknown or already final.
    pub fn cancel(&self, handle: &str) -> bool {
        transition(&self.invoices, handle, InvoiceState::Canceled)
    }

    /// Recent payments, oldest first.
    pub fn sent_payments(&self) -> Vec<PaymentRequest> {
        self.payments
            .lock()
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Move a pending invoice to its final state and retire its channel.
fn transition(book: &SharedBook, handle: &str, next: InvoiceState) -> bool {
    let Ok(mut book) = book.lock() else {
        return false;
    };
    let Some(tx) = book.open.remove(handle) else {
        return false;
    };
    // Receivers still observe the final value after the sender is dropped.
    tx.send_replace(next);
    book.finished.push_back((handle.to_string(), next));
    if book.finished.len() > FINISHED_RETAINED {
        book.finished.pop_front();
    }
    true
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_invoice(&self, amount: u64) -> Result<Invoice> {
        let handle = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let payment_request = format!("lnsim{amount}n1{}", &handle[..32]);

        let (tx, _rx) = watch::channel(InvoiceState::Pending);
        self.invoices
            .lock()
            .map_err(|_| anyhow!("invoice book poisoned"))?
            .open
            .insert(handle.clone(), tx);

        if let Some(delay) = self.auto_settle {
            let book = Arc::clone(&self.invoices);
            let h = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if transition(&book, &h, InvoiceState::Settled) {
                    debug!(handle = %h, "Simulated invoice auto-settled");
                }
            });
        }

        info!(handle = %handle, amount, "Simulated invoice created");
        Ok(Invoice {
            handle,
            payment_request,
        })
    }

    async fn subscribe_settlement(
        &self,
        handle: &str,
    ) -> Result<BoxStream<'static, Result<InvoiceState>>> {
        let rx = {
            let book = self
                .invoices
                .lock()
                .map_err(|_| anyhow!("invoice book poisoned"))?;
            match book.open.get(handle) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (_, state) = book
                        .finished
                        .iter()
                        .rev()
                        .find(|(h, _)| h == handle)
                        .ok_or_else(|| anyhow!("Unknown invoice: {handle}"))?;
                    return Ok(stream::iter([Ok(*state)]).boxed());
                }
            }
        };

        // Emit the current state, then every change, ending after a terminal one.
        let updates = stream::unfold((rx, false, false), |(mut rx, started, done)| async move {
            if done {
                return None;
            }
            if started && rx.changed().await.is_err() {
                return None;
            }
            let state = *rx.borrow_and_update();
            Some((Ok(state), (rx, true, state.is_terminal())))
        });

        Ok(updates.boxed())
    }

    async fn send_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<BoxStream<'static, Result<PaymentState>>> {
        info!(
            target_node = %request.target,
            amount = request.amount,
            max_fee = request.max_fee,
            "Simulated keysend payment"
        );
        {
            let mut log = self
                .payments
                .lock()
                .map_err(|_| anyhow!("payment log poisoned"))?;
            log.push_back(request);
            if log.len() > PAYMENTS_RETAINED {
                log.pop_front();
            }
        }

        let last = if self.fail_payments {
            PaymentState::Failed
        } else {
            PaymentState::Succeeded
        };
        Ok(stream::iter(vec![Ok(PaymentState::InFlight), Ok(last)]).boxed())
    }

    fn name(&self) -> &str {
        GATEWAY_NAME
    }
}
