//! Payment gateway integration.
//!
//! Defines the `PaymentGateway` trait the engine consumes and provides:
//! - Simulated: in-memory invoices and keysend payments for local runs
//!
//! A real Lightning node adapter implements the same trait; the engine
//! never talks to a node directly.

pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque reference to an invoice issued by the gateway (its payment hash).
pub type InvoiceHandle = String;

/// A freshly created invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub handle: InvoiceHandle,
    /// Encoded payment request shown to the payer.
    pub payment_request: String,
}

/// Invoice lifecycle events emitted by `subscribe_settlement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceState {
    Pending,
    Settled,
    Canceled,
}

impl InvoiceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceState::Pending)
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceState::Pending => write!(f, "PENDING"),
            InvoiceState::Settled => write!(f, "SETTLED"),
            InvoiceState::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Outgoing payment events emitted by `send_payment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    InFlight,
    Succeeded,
    Failed,
}

/// A keysend payment to a participant's node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub target: String,
    pub amount: u64,
    /// Routing fee ceiling in satoshis.
    pub max_fee: u64,
    pub timeout: Duration,
}

/// Abstraction over a Lightning node's invoice and payment RPCs.
///
/// Streams end when the gateway has nothing more to report; an error item
/// means the subscription broke, not that the payment failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Issue an invoice for `amount` satoshis.
    async fn create_invoice(&self, amount: u64) -> Result<Invoice>;

    /// Follow the state of a previously issued invoice.
    async fn subscribe_settlement(
        &self,
        handle: &str,
    ) -> Result<BoxStream<'static, Result<InvoiceState>>>;

    /// Push a keysend payment and follow its status.
    async fn send_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<BoxStream<'static, Result<PaymentState>>>;

    /// Gateway name for logging.
    fn name(&self) -> &str;
}
