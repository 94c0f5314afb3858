//! Per-node waiting list: the per-frame input barrier
//!
//! Each barrier-tracked entry point has an item carrying its declared
//! connection count and how many packets arrived this frame. A node
//! executes once every item is full, after which the list resets for the
//! next frame.

use resona_core::{record_error, CoreError};

/// What a single delivery did to the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// The entry is not tracked (multiplicity zero): no bookkeeping
    Untracked,
    /// One more packet arrived, entry not yet full
    Partial,
    /// This delivery completed the entry
    EntryReady,
    /// This delivery completed the entry and the whole node; the list has
    /// been reset
    AllReady,
}

/// Barrier state of one tracked entry point
#[derive(Debug, Clone)]
pub struct WaitingItem {
    pub id: String,
    pub connections: usize,
    pub times_received: usize,
    pub received: bool,
}

impl WaitingItem {
    fn new(id: String) -> Self {
        Self {
            id,
            connections: 0,
            times_received: 0,
            received: false,
        }
    }
}

/// The waiting list of one node
#[derive(Debug, Default)]
pub struct WaitingList {
    items: Vec<WaitingItem>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new entry point (called at entry creation for notifying
    /// entries)
    pub fn add_entry(&mut self, id: &str) {
        self.items.push(WaitingItem::new(id.to_string()));
    }

    /// Update the declared connection count of an entry (called when a
    /// subscription is added, frozen at end of setup)
    pub fn set_connections(&mut self, id: &str, connections: usize) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.connections = connections;
        }
    }

    pub fn item(&self, id: &str) -> Option<&WaitingItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Register one delivery to `id` and report what it completed.
    pub fn on_received(&mut self, id: &str) -> BarrierOutcome {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            record_error(CoreError::OutOfRange(format!(
                "no entry point registered with id {id}"
            )));
            return BarrierOutcome::Untracked;
        };

        if item.connections == 0 {
            return BarrierOutcome::Untracked;
        }

        if item.received {
            // A second packet while the entry is already full: the frame
            // protocol was violated upstream.
            record_error(CoreError::NotAllowed(format!(
                "entry point {id} received data while already full"
            )));
        }

        item.times_received += 1;
        if item.times_received < item.connections {
            return BarrierOutcome::Partial;
        }
        item.received = true;

        if self.all_received() {
            self.reset();
            BarrierOutcome::AllReady
        } else {
            BarrierOutcome::EntryReady
        }
    }

    fn all_received(&self) -> bool {
        self.items
            .iter()
            .filter(|item| item.connections > 0)
            .all(|item| item.received)
    }

    /// Clear the per-frame counters
    pub fn reset(&mut self) {
        for item in &mut self.items {
            item.times_received = 0;
            item.received = false;
        }
    }
}
