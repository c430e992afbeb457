//! Shared types for the LOTTO engine.
//!
//! These types form the data model used across all modules.
//! They are kept free of engine internals so that the gateway, engine,
//! and server modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One admitted, payment-confirmed raffle stake.
///
/// Entries are immutable once admitted; the ledger only ever appends them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Participant identifier (a Lightning node pubkey in production).
    pub participant_id: String,
    /// Stake in satoshis. Always > 0 for an admitted entry.
    pub amount: u64,
}

impl Entry {
    pub fn new(participant_id: impl Into<String>, amount: u64) -> Self {
        Self {
            participant_id: participant_id.into(),
            amount,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.participant_id, self.amount)
    }
}

// ---------------------------------------------------------------------------
// Entry validation
// ---------------------------------------------------------------------------

/// Admission rules applied before any external call is made.
#[derive(Debug, Clone)]
pub struct EntryPolicy {
    pub min_amount: u64,
    pub max_amount: u64,
    /// Require participant IDs to be compressed secp256k1 node pubkeys.
    pub strict_node_ids: bool,
}

impl Default for EntryPolicy {
    fn default() -> Self {
        Self {
            min_amount: 1,
            max_amount: u64::MAX,
            strict_node_ids: false,
        }
    }
}

impl EntryPolicy {
    /// Validate a raw request and build the entry it would admit.
    pub fn validate(&self, participant_id: &str, amount: u64) -> Result<Entry, LottoError> {
        let id = participant_id.trim();
        if id.is_empty() {
            return Err(LottoError::Validation("participant id is empty".into()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(LottoError::Validation(format!(
                "participant id contains whitespace: {id:?}"
            )));
        }
        if self.strict_node_ids && !is_node_pubkey(id) {
            return Err(LottoError::Validation(format!(
                "participant id is not a node pubkey: {id}"
            )));
        }
        if amount == 0 {
            return Err(LottoError::Validation("amount must be greater than zero".into()));
        }
        if amount < self.min_amount.max(1) {
            return Err(LottoError::Validation(format!(
                "amount {amount} below minimum of {} sats",
                self.min_amount
            )));
        }
        if amount > self.max_amount {
            return Err(LottoError::Validation(format!(
                "amount {amount} above maximum of {} sats",
                self.max_amount
            )));
        }
        Ok(Entry::new(id, amount))
    }
}

/// Whether `id` looks like a compressed node pubkey (33 bytes, hex encoded).
pub fn is_node_pubkey(id: &str) -> bool {
    id.len() == 66
        && (id.starts_with("02") || id.starts_with("03"))
        && id.chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Winner history
// ---------------------------------------------------------------------------

/// Terminal (or pending) state of a winner's payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutStatus {
    /// Dispatched, no terminal status yet.
    Pending,
    Succeeded,
    Failed,
    /// No terminal status within the payout timeout.
    TimedOut,
    /// The house node won; the pot is kept and nothing is sent.
    Retained,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PayoutStatus::Pending)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "PENDING"),
            PayoutStatus::Succeeded => write!(f, "SUCCEEDED"),
            PayoutStatus::Failed => write!(f, "FAILED"),
            PayoutStatus::TimedOut => write!(f, "TIMED_OUT"),
            PayoutStatus::Retained => write!(f, "RETAINED"),
        }
    }
}

/// Result of settling a round with at least one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerRecord {
    /// Index of the settled round (0-based, counted since process start).
    pub round_index: u64,
    pub participant_id: String,
    /// Pot at the instant of settlement.
    pub pot: u64,
    /// Amount owed to the winner after the house fee.
    pub payout_amount: u64,
    pub settled_at: DateTime<Utc>,
    pub payout_status: PayoutStatus,
}

impl fmt::Display for WinnerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{}: {} won {} sats (pot {}) [{}]",
            self.round_index, self.participant_id, self.payout_amount, self.pot, self.payout_status,
        )
    }
}

// ---------------------------------------------------------------------------
// Display snapshot
// ---------------------------------------------------------------------------

/// Point-in-time, read-only view of the lottery for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_index: u64,
    /// Active round entries in admission order.
    pub entries: Vec<Entry>,
    pub pot: u64,
    /// What the winner of the active round would receive.
    pub payout_size: u64,
    pub started_at: DateTime<Utc>,
    pub round_ends_at: DateTime<Utc>,
    /// Milliseconds until the round closes (0 once overdue).
    pub time_left_ms: u64,
    pub winners: Vec<WinnerRecord>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for LOTTO.
#[derive(Debug, thiserror::Error)]
pub enum LottoError {
    #[error("Invalid entry: {0}")]
    Validation(String),

    #[error("Gateway error ({operation}): {message}")]
    Gateway { operation: String, message: String },

    #[error("Invoice {handle} not settled within {secs}s")]
    SettlementTimeout { handle: String, secs: u64 },

    #[error("Invoice {handle} failed: {reason}")]
    SettlementFailed { handle: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl LottoError {
    pub fn gateway(operation: &str, err: impl fmt::Display) -> Self {
        LottoError::Gateway {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
