//! # Capability Heap
//!
//! Per-connection table from opaque id to a live local value that crossed
//! the wire by handle.
//!
//! ## Invariants
//!
//! * Ids are 128 random bits (32 lowercase hex characters), never
//!   sequential, and never reused within one heap.
//! * Entries are only added; nothing is evicted until `dispose_all`.
//! * Reads and inserts are safe from concurrently running calls.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use tracing::trace;

use capwire::Value;

#[derive(Default)]
pub struct Heap {
    entries: DashMap<String, Value>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under a fresh id.
    pub fn put(&self, value: Value) -> String {
        loop {
            let id = format!("{:032x}", rand::random::<u128>());
            if let Entry::Vacant(slot) = self.entries.entry(id.clone()) {
                trace!(id = %id, kind = value.type_name(), "heap insert");
                slot.insert(value);
                return id;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every entry. Called when the connection ends.
    pub fn dispose_all(&self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        debug!(released, "heap disposed");
        released
    }
}
