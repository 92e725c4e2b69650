// Stream merger: one ordered, duplicate-free timeline per room.
//
// Live entries append in arrival order. The history snapshot is placed in
// front of whatever live entries arrived before it. Nothing is re-sorted
// after insertion.

use std::collections::HashSet;

use nomad_common::types::{Entry, EntryId, Incident, Message};

/// Anything that can live in a timeline.
pub trait TimelineEntry {
    fn entry_id(&self) -> &EntryId;
}

impl TimelineEntry for Entry {
    fn entry_id(&self) -> &EntryId {
        self.id()
    }
}

impl TimelineEntry for Message {
    fn entry_id(&self) -> &EntryId {
        &self.id
    }
}

impl TimelineEntry for Incident {
    fn entry_id(&self) -> &EntryId {
        &self.id
    }
}

#[derive(Debug, Clone)]
pub struct Timeline<E> {
    entries: Vec<E>,
    ids: HashSet<EntryId>,
}

impl<E> Default for Timeline<E> {
    fn default() -> Self {
        Self { entries: Vec::new(), ids: HashSet::new() }
    }
}

impl<E: TimelineEntry> Timeline<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a live entry. Returns `false` if its id is already present.
    pub fn insert(&mut self, entry: E) -> bool {
        if !self.ids.insert(entry.entry_id().clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Merge a history snapshot ahead of the current entries, keeping the
    /// snapshot's own order. Returns how many entries were added.
    pub fn seed(&mut self, history: impl IntoIterator<Item = E>) -> usize {
        let mut fresh = Vec::new();
        for entry in history {
            if self.ids.insert(entry.entry_id().clone()) {
                fresh.push(entry);
            }
        }
        let added = fresh.len();
        self.entries.splice(0..0, fresh);
        added
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.ids.contains(id)
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }
}
