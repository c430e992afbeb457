//! Ticket broadcaster: live fan-out of admitted entries.
//!
//! Each subscriber owns a bounded queue. Notification never blocks: a full
//! queue drops the new entry for that subscriber only, keeping what it has
//! already buffered. Subscribers whose receiver is gone are pruned on the
//! next notification.
//!
//! Replay ordering relies on the caller: the round ledger subscribes while
//! holding its shared lock and notifies while holding its exclusive lock,
//! so no admission can slip between the replay and registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::types::Entry;

/// Opaque subscriber handle.
pub type SubscriberId = u64;

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Entry>>,
    /// Entries dropped per subscriber because its queue was full.
    dropped: HashMap<SubscriberId, u64>,
}

/// Pub/sub fan-out of admitted entries.
pub struct TicketBroadcaster {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    live_capacity: usize,
}

impl TicketBroadcaster {
    /// `live_capacity` is the queue room each subscriber gets beyond its replay.
    pub fn new(live_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            live_capacity: live_capacity.max(1),
        }
    }

    /// Register a subscriber whose queue starts with `replay`.
    pub fn subscribe(self: &Arc<Self>, replay: &[Entry]) -> EntryStream {
        let (tx, rx) = mpsc::channel(replay.len() + self.live_capacity);
        for entry in replay {
            // Capacity covers the whole replay.
            let _ = tx.try_send(entry.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut registry) = self.registry.lock() {
            registry.subscribers.insert(id, tx);
        }
        debug!(subscriber = id, replayed = replay.len(), "Entry stream subscribed");

        EntryStream {
            id,
            rx,
            broadcaster: Arc::clone(self),
        }
    }

    /// Deliver `entry` to every subscriber without waiting.
    pub fn notify(&self, entry: &Entry) {
        let Ok(mut registry) = self.registry.lock() else {
            warn!("Broadcaster registry poisoned, entry not fanned out");
            return;
        };

        let mut closed = Vec::new();
        let mut full = Vec::new();
        for (id, tx) in &registry.subscribers {
            match tx.try_send(entry.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => full.push(*id),
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in full {
            *registry.dropped.entry(id).or_default() += 1;
            warn!(subscriber = id, entry = %entry, "Subscriber queue full, entry dropped");
        }
        for id in closed {
            registry.subscribers.remove(&id);
            registry.dropped.remove(&id);
            debug!(subscriber = id, "Pruned closed subscriber");
        }
    }

    /// Remove a subscriber. Unknown or already-removed handles are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut registry) = self.registry.lock() {
            if registry.subscribers.remove(&id).is_some() {
                debug!(subscriber = id, "Entry stream unsubscribed");
            }
            registry.dropped.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().map(|r| r.subscribers.len()).unwrap_or(0)
    }

    /// Entries dropped for `id` because its queue was full.
    pub fn dropped_for(&self, id: SubscriberId) -> u64 {
        self.registry
            .lock()
            .ok()
            .and_then(|r| r.dropped.get(&id).copied())
            .unwrap_or(0)
    }
}

/// Receiving side of a subscription. Dropping it unsubscribes.
pub struct EntryStream {
    id: SubscriberId,
    rx: mpsc::Receiver<Entry>,
    broadcaster: Arc<TicketBroadcaster>,
}

impl EntryStream {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next entry, replay first. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Entry> {
        self.rx.recv().await
    }

    /// Next buffered entry without waiting.
    pub fn try_recv(&mut self) -> Option<Entry> {
        self.rx.try_recv().ok()
    }

    /// Unsubscribe explicitly (e.g. on transport close).
    pub fn close(&mut self) {
        self.broadcaster.unsubscribe(self.id);
        self.rx.close();
    }
}

impl Drop for EntryStream {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}
