//! Mock gateway for integration testing.
//!
//! Provides a deterministic `PaymentGateway` implementation: invoices
//! settle only when a test says so, payments follow a chosen script, and
//! every operation can be forced to fail.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use lotto::gateway::{Invoice, InvoiceState, PaymentGateway, PaymentRequest, PaymentState};

type Update = Result<InvoiceState>;

/// How `send_payment` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentScript {
    Succeed,
    Fail,
    /// Report in-flight, then never finish.
    Hang,
}

struct MockInvoice {
    state: InvoiceState,
    watchers: Vec<mpsc::UnboundedSender<Update>>,
}

/// A mock Lightning gateway for deterministic testing.
pub struct MockGateway {
    invoices: Arc<Mutex<HashMap<String, MockInvoice>>>,
    payments: Arc<Mutex<Vec<PaymentRequest>>>,
    script: Arc<Mutex<PaymentScript>>,
    next_invoice: Arc<Mutex<u64>>,
    /// If set, invoice and payment calls return this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            invoices: Arc::new(Mutex::new(HashMap::new())),
            payments: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(PaymentScript::Succeed)),
            next_invoice: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Force all subsequent gateway calls to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn set_payment_script(&self, script: PaymentScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn settle(&self, handle: &str) {
        self.finish(handle, InvoiceState::Settled);
    }

    pub fn cancel(&self, handle: &str) {
        self.finish(handle, InvoiceState::Canceled);
    }

    /// Break every open settlement stream for `handle`.
    pub fn break_stream(&self, handle: &str) {
        let mut invoices = self.invoices.lock().unwrap();
        if let Some(invoice) = invoices.get_mut(handle) {
            for watcher in invoice.watchers.drain(..) {
                let _ = watcher.send(Err(anyhow!("connection reset")));
            }
        }
    }

    /// Get all payments pushed so far.
    pub fn payments(&self) -> Vec<PaymentRequest> {
        self.payments.lock().unwrap().clone()
    }

    fn finish(&self, handle: &str, state: InvoiceState) {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.get_mut(handle).expect("unknown invoice");
        invoice.state = state;
        for watcher in invoice.watchers.drain(..) {
            let _ = watcher.send(Ok(state));
        }
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_invoice(&self, amount: u64) -> Result<Invoice> {
        self.check_error()?;
        let n = {
            let mut next = self.next_invoice.lock().unwrap();
            *next += 1;
            *next
        };
        let handle = format!("MOCK-INV-{n:04}");
        self.invoices.lock().unwrap().insert(
            handle.clone(),
            MockInvoice {
                state: InvoiceState::Pending,
                watchers: Vec::new(),
            },
        );
        Ok(Invoice {
            payment_request: format!("lnmock{amount}-{handle}"),
            handle,
        })
    }

    async fn subscribe_settlement(&self, handle: &str) -> Result<BoxStream<'static, Update>> {
        self.check_error()?;
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices
            .get_mut(handle)
            .ok_or_else(|| anyhow!("unknown invoice {handle}"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(invoice.state));
        if !invoice.state.is_terminal() {
            invoice.watchers.push(tx);
        }

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        })
        .boxed())
    }

    async fn send_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<BoxStream<'static, Result<PaymentState>>> {
        self.check_error()?;
        self.payments.lock().unwrap().push(request);

        let in_flight = stream::iter([Ok(PaymentState::InFlight)]);
        let updates = match *self.script.lock().unwrap() {
            PaymentScript::Succeed => in_flight
                .chain(stream::iter([Ok(PaymentState::Succeeded)]))
                .boxed(),
            PaymentScript::Fail => in_flight
                .chain(stream::iter([Ok(PaymentState::Failed)]))
                .boxed(),
            PaymentScript::Hang => in_flight.chain(stream::pending()).boxed(),
        };
        Ok(updates)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
