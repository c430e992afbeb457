//! Round timer.
//!
//! Fires the settlement callback once per period. The callback is awaited
//! before the next tick is taken, so settlements never overlap; a slow
//! settlement pushes the following tick back instead of stacking ticks.
//! The timer never touches ledger state itself.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Remaining time in a round that started at `started_at`.
pub fn time_left(period: Duration, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    period.saturating_sub(elapsed)
}

/// When a round that started at `started_at` is due to close.
pub fn round_ends_at(period: Duration, started_at: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(period)
        .map(|d| started_at + d)
        .unwrap_or(started_at)
}

/// Fixed-period ticker driving round settlement.
#[derive(Debug, Clone, Copy)]
pub struct RoundTimer {
    period: Duration,
}

impl RoundTimer {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Returns the number of settlements performed.
    pub async fn run<F, Fut>(self, mut settle: F, mut shutdown: watch::Receiver<bool>) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        info!(period_secs = self.period.as_secs_f64(), "Round timer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    debug!(tick = ticks, "Round timer fired");
                    settle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(ticks, "Round timer stopped");
        ticks
    }
}
