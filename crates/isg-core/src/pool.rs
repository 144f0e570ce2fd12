//! # String Pool
//!
//! Deduplicated, reference-counted storage for names and paths.
//!
//! Every string-bearing field in the graph stores a [`StrId`] into this pool.
//! Each holder takes one reference with [`StringPool::intern`] and gives it
//! back with [`StringPool::release`]; a slot is freed and reused once its
//! count drops to zero, so memory stays bounded across repeated updates.

use crate::types::StrId;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Slot {
    text: Arc<str>,
    refs: u32,
}

/// Interned string storage.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    slots: Vec<Option<Slot>>,
    lookup: BTreeMap<Arc<str>, StrId>,
    free: Vec<u32>,
}

impl StringPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, taking one reference.
    pub fn intern(&mut self, text: &str) -> StrId {
        if let Some(&id) = self.lookup.get(text) {
            if let Some(Some(slot)) = self.slots.get_mut(id.0 as usize) {
                slot.refs = slot.refs.saturating_add(1);
            }
            return id;
        }

        let shared: Arc<str> = Arc::from(text);
        let slot = Slot {
            text: Arc::clone(&shared),
            refs: 1,
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                StrId(index)
            }
            None => {
                self.slots.push(Some(slot));
                StrId((self.slots.len() - 1) as u32)
            }
        };
        self.lookup.insert(shared, id);
        id
    }

    /// Drop one reference; the slot is freed when none remain.
    pub fn release(&mut self, id: StrId) {
        let Some(entry) = self.slots.get_mut(id.0 as usize) else {
            return;
        };
        let Some(slot) = entry.as_mut() else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            let text = Arc::clone(&slot.text);
            *entry = None;
            self.lookup.remove(&text);
            self.free.push(id.0);
        }
    }

    /// Find an already interned string without taking a reference.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<StrId> {
        self.lookup.get(text).copied()
    }

    /// Resolve an id to its text.
    #[must_use]
    pub fn resolve(&self, id: StrId) -> Option<&str> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .map(|slot| &*slot.text)
    }

    /// Resolve an id, yielding an empty string for dead ids.
    #[must_use]
    pub fn text(&self, id: StrId) -> &str {
        self.resolve(id).unwrap_or("")
    }

    /// Current reference count of an id (0 when free).
    #[must_use]
    pub fn refs(&self, id: StrId) -> u32 {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.refs)
    }

    /// Number of live strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
