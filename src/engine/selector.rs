//! Weighted winner selection.
//!
//! Every satoshi staked is one ticket: an entry of `amount` sats wins with
//! probability `amount / total`. The draw is split into a random roll and
//! a pure walk so that any draw can be replayed from a snapshot and a roll.

use rand::Rng;

use crate::types::Entry;

/// Total stake across `entries` (the number of tickets in the draw).
pub fn total_weight(entries: &[Entry]) -> u64 {
    entries.iter().map(|e| e.amount).sum()
}

/// Pick the entry whose ticket range contains `roll`.
///
/// Walks entries in admission order with a running sum `s`; the winner is
/// the entry with `s <= roll < s + amount`. Returns `None` when the total
/// weight is zero or `roll` is out of range.
pub fn select_winner(entries: &[Entry], roll: u64) -> Option<&Entry> {
    let mut start = 0u64;
    for entry in entries {
        let end = start + entry.amount;
        if roll < end {
            return Some(entry);
        }
        start = end;
    }
    None
}

/// Draw a winner using `rng` for the roll.
///
/// Returns the winner together with the roll that produced it, so the
/// draw can be reproduced with `select_winner`.
pub fn draw<'a, R: Rng + ?Sized>(entries: &'a [Entry], rng: &mut R) -> Option<(&'a Entry, u64)> {
    let total = total_weight(entries);
    if total == 0 {
        return None;
    }
    let roll = rng.gen_range(0..total);
    select_winner(entries, roll).map(|winner| (winner, roll))
}
