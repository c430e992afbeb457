//! Round ledger: the active round's entries and pot, plus winner history.
//!
//! Lock discipline (one reader/writer lock around all mutable state):
//! - shared: `snapshot`, `subscribe` (replay of the active round)
//! - exclusive: `admit`, `settle`, `reset`, `record_payout_status`
//!
//! The round's `started_at` doubles as the timer's last reset, so the
//! countdown and the round roll over together. No method awaits anything
//! but the lock. Settlement draws, closes the round, and appends the winner
//! record under a single exclusive hold.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::engine::broadcaster::{EntryStream, TicketBroadcaster};
use crate::engine::payout::payout_size;
use crate::engine::selector;
use crate::engine::timer;
use crate::types::{Entry, PayoutStatus, RoundSnapshot, WinnerRecord};

// ---------------------------------------------------------------------------
// Round state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Round {
    index: u64,
    entries: Vec<Entry>,
    /// Always equal to the sum of `entries[..].amount`.
    pot: u64,
    started_at: DateTime<Utc>,
}

impl Round {
    fn fresh(index: u64) -> Self {
        Self {
            index,
            entries: Vec::new(),
            pot: 0,
            started_at: Utc::now(),
        }
    }
}

struct LedgerState {
    round: Round,
    winners: Vec<WinnerRecord>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct RoundLedger {
    state: RwLock<LedgerState>,
    broadcaster: Arc<TicketBroadcaster>,
    round_duration: Duration,
    payout_ratio: Decimal,
    /// A win by this participant keeps the pot.
    house_node_id: Option<String>,
}

impl RoundLedger {
    pub fn new(
        round_duration: Duration,
        payout_ratio: Decimal,
        broadcaster: Arc<TicketBroadcaster>,
    ) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                round: Round::fresh(0),
                winners: Vec::new(),
            }),
            broadcaster,
            round_duration,
            payout_ratio,
            house_node_id: None,
        }
    }

    /// Mark wins by `house_node_id` as retained instead of paid out.
    pub fn with_house_node(mut self, house_node_id: Option<String>) -> Self {
        self.house_node_id = house_node_id;
        self
    }

    pub fn broadcaster(&self) -> &Arc<TicketBroadcaster> {
        &self.broadcaster
    }

    /// Append a validated entry to the active round and fan it out.
    ///
    /// Returns the index of the round the entry landed in.
    pub async fn admit(&self, entry: Entry) -> u64 {
        let mut state = self.state.write().await;
        let round = &mut state.round;
        round.pot += entry.amount;
        round.entries.push(entry.clone());

        // Under the exclusive lock so no subscriber's replay can race it.
        self.broadcaster.notify(&entry);

        info!(
            round = round.index,
            participant_id = %entry.participant_id,
            amount = entry.amount,
            pot = round.pot,
            "Entry admitted"
        );
        round.index
    }

    /// Read-only view of the active round and winner history.
    pub async fn snapshot(&self) -> RoundSnapshot {
        let state = self.state.read().await;
        let round = &state.round;
        let now = Utc::now();
        RoundSnapshot {
            round_index: round.index,
            entries: round.entries.clone(),
            pot: round.pot,
            payout_size: payout_size(round.pot, self.payout_ratio),
            started_at: round.started_at,
            round_ends_at: timer::round_ends_at(self.round_duration, round.started_at),
            time_left_ms: timer::time_left(self.round_duration, round.started_at, now)
                .as_millis() as u64,
            winners: state.winners.clone(),
        }
    }

    /// Remaining time in the active round.
    pub async fn time_left(&self) -> Duration {
        let state = self.state.read().await;
        timer::time_left(self.round_duration, state.round.started_at, Utc::now())
    }

    /// Subscribe to admitted entries, starting with a replay of the active round.
    pub async fn subscribe(&self) -> EntryStream {
        let state = self.state.read().await;
        self.broadcaster.subscribe(&state.round.entries)
    }

    /// Close the active round and draw its winner with a random roll.
    pub async fn settle(&self) -> Option<WinnerRecord> {
        let mut state = self.state.write().await;
        self.settle_locked(&mut state, |entries| {
            selector::draw(entries, &mut rand::thread_rng()).map(|(e, r)| (e.clone(), r))
        })
    }

    /// Close the active round and draw its winner with the given roll source.
    ///
    /// `roll` receives the total weight `T` and should return a value in
    /// `[0, T)`. It is only called when `T > 0`. An empty round settles to
    /// `None` with no draw. A roll outside `[0, T)` leaves the round open.
    pub async fn settle_with<F>(&self, roll: F) -> Option<WinnerRecord>
    where
        F: FnOnce(u64) -> u64,
    {
        let mut state = self.state.write().await;
        self.settle_locked(&mut state, |entries| {
            let r = roll(selector::total_weight(entries));
            selector::select_winner(entries, r).map(|e| (e.clone(), r))
        })
    }

    /// Draw, close, and record in one exclusive section, so every snapshot
    /// sees the round either open or already in the winner history.
    fn settle_locked<F>(&self, state: &mut LedgerState, pick: F) -> Option<WinnerRecord>
    where
        F: FnOnce(&[Entry]) -> Option<(Entry, u64)>,
    {
        let index = state.round.index;
        if state.round.entries.is_empty() {
            state.round = Round::fresh(index + 1);
            info!(round = index, "Round closed with no entries, no draw");
            return None;
        }

        let Some((winner, roll)) = pick(&state.round.entries) else {
            warn!(
                round = index,
                total = state.round.pot,
                "Roll outside ticket range, round left open"
            );
            return None;
        };

        let closed = std::mem::replace(&mut state.round, Round::fresh(index + 1));
        let house_win = self.house_node_id.as_deref() == Some(winner.participant_id.as_str());
        let payout_status = if house_win {
            PayoutStatus::Retained
        } else {
            PayoutStatus::Pending
        };
        let record = WinnerRecord {
            round_index: closed.index,
            participant_id: winner.participant_id,
            pot: closed.pot,
            payout_amount: payout_size(closed.pot, self.payout_ratio),
            settled_at: Utc::now(),
            payout_status,
        };
        state.winners.push(record.clone());

        info!(
            round = record.round_index,
            winner = %record.participant_id,
            roll,
            pot = record.pot,
            payout = record.payout_amount,
            entries = closed.entries.len(),
            status = %record.payout_status,
            "Winner drawn"
        );
        Some(record)
    }

    /// Discard the active round without a draw.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let discarded = state.round.entries.len();
        state.round = Round::fresh(state.round.index + 1);
        debug!(round = state.round.index, discarded, "Round reset");
    }

    /// Record the payout status for a settled round.
    ///
    /// Only a pending record is updated; returns whether anything changed.
    pub async fn record_payout_status(&self, round_index: u64, status: PayoutStatus) -> bool {
        let mut state = self.state.write().await;
        match state
            .winners
            .iter_mut()
            .rev()
            .find(|w| w.round_index == round_index)
        {
            Some(record) if !record.payout_status.is_terminal() => {
                record.payout_status = status;
                debug!(round = round_index, status = %status, "Payout status recorded");
                true
            }
            Some(_) => false,
            None => {
                warn!(round = round_index, "No winner record for payout status");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
