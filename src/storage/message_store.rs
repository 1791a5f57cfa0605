//! Bounded in-memory history for a chat room
//!
//! A fixed ring of slots with a cursor that always points at the next
//! slot to overwrite. Nothing is persisted.

use std::sync::{Arc, Mutex};

use crate::core::message::HistoryEntry;

/// Fixed-capacity ring of recent messages
#[derive(Debug)]
pub struct MessageStore {
    slots: Vec<Option<HistoryEntry>>,
    next: usize,
}

impl MessageStore {
    /// Create a message store holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
        }
    }

    /// Overwrite the oldest slot with a new entry
    pub fn add_message(&mut self, entry: HistoryEntry) {
        self.slots[self.next] = Some(entry);
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Retained entries, oldest first
    pub fn all_messages(&self) -> Vec<HistoryEntry> {
        let len = self.slots.len();
        (0..len)
            .filter_map(|offset| self.slots[(self.next + offset) % len].clone())
            .collect()
    }

    /// The most recent `limit` entries, oldest first
    pub fn recent_messages(&self, limit: usize) -> Vec<HistoryEntry> {
        let all = self.all_messages();
        let skip = all.len().saturating_sub(limit);
        all.into_iter().skip(skip).collect()
    }

    /// Index of the slot the next append overwrites
    pub fn cursor(&self) -> usize {
        self.next
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
    }
}

/// Thread-safe wrapper for MessageStore
pub type SharedMessageStore = Arc<Mutex<MessageStore>>;

/// Create a new thread-safe message store with custom capacity
pub fn create_message_store_with_capacity(capacity: usize) -> SharedMessageStore {
    Arc::new(Mutex::new(MessageStore::with_capacity(capacity)))
}
