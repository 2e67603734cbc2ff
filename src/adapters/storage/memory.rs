//! # Memory Storage Adapter
//!
//! In-memory payload store: an insertion-ordered `Vec` plus a key map
//! for O(1) primary-key lookup.
//!
//! Good for:
//! - Embedded use (the whole dataset fits in RAM)
//! - Testing

use std::collections::HashMap;

use crate::core::{Payload, PayloadKey};
use crate::ports::PayloadStore;

/// In-memory storage adapter
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Payloads in insertion order
    payloads: Vec<Payload>,

    /// Key -> index into `payloads`
    lookup: HashMap<PayloadKey, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with room for `capacity` payloads
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            payloads: Vec::with_capacity(capacity),
            lookup: HashMap::with_capacity(capacity),
        }
    }

    fn reindex_from(&mut self, start: usize) {
        for (i, p) in self.payloads.iter().enumerate().skip(start) {
            self.lookup.insert(p.key(), i);
        }
    }
}

impl PayloadStore for MemoryStore {
    fn insert(&mut self, payload: Payload) -> usize {
        let key = payload.key();
        if let Some(&index) = self.lookup.get(&key) {
            self.payloads[index] = payload;
            return index;
        }
        let index = self.payloads.len();
        self.payloads.push(payload);
        self.lookup.insert(key, index);
        index
    }

    fn remove(&mut self, key: PayloadKey) -> Option<Payload> {
        let index = self.lookup.remove(&key)?;
        let removed = self.payloads.remove(index);
        self.reindex_from(index);
        Some(removed)
    }

    fn index_of(&self, key: PayloadKey) -> Option<usize> {
        self.lookup.get(&key).copied()
    }

    fn at(&self, index: usize) -> Option<&Payload> {
        self.payloads.get(index)
    }

    fn at_mut(&mut self, index: usize) -> Option<&mut Payload> {
        self.payloads.get_mut(index)
    }

    fn len(&self) -> usize {
        self.payloads.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Payload> + '_> {
        Box::new(self.payloads.iter())
    }

    fn clear(&mut self) {
        self.payloads.clear();
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Field, TableId};

    fn payload(table: u32, id: i64) -> Payload {
        Payload::new(TableId(table), id, vec![Field::new("id", id)])
    }

    #[test]
    fn test_memory_store_insert_and_get() {
        let mut store = MemoryStore::new();
        let idx = store.insert(payload(0, 7));

        assert_eq!(idx, 0);
        assert_eq!(store.len(), 1);
        assert!(store.contains(PayloadKey::new(TableId(0), 7)));
        assert_eq!(store.get(PayloadKey::new(TableId(0), 7)).map(|p| p.id), Some(7));
    }

    #[test]
    fn test_memory_store_same_id_different_tables() {
        let mut store = MemoryStore::new();
        store.insert(payload(0, 1));
        store.insert(payload(1, 1));

        assert_eq!(store.len(), 2);
        assert_eq!(store.index_of(PayloadKey::new(TableId(1), 1)), Some(1));
    }

    #[test]
    fn test_memory_store_insert_replaces_in_place() {
        let mut store = MemoryStore::new();
        store.insert(payload(0, 1));
        store.insert(payload(0, 2));

        let mut replacement = payload(0, 1);
        replacement.set_field("name", "x".into());
        let idx = store.insert(replacement);

        assert_eq!(idx, 0);
        assert_eq!(store.len(), 2);
        assert!(store.at(0).unwrap().field("name").is_some());
    }

    #[test]
    fn test_memory_store_remove_keeps_order_and_lookup() {
        let mut store = MemoryStore::new();
        for id in 1..=4 {
            store.insert(payload(0, id));
        }

        let removed = store.remove(PayloadKey::new(TableId(0), 2));
        assert_eq!(removed.map(|p| p.id), Some(2));
        assert_eq!(store.len(), 3);

        let ids: Vec<i64> = store.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(store.index_of(PayloadKey::new(TableId(0), 4)), Some(2));
        assert!(store.remove(PayloadKey::new(TableId(0), 2)).is_none());
    }

    #[test]
    fn test_memory_store_table_indices_and_clear() {
        let mut store = MemoryStore::new();
        store.insert(payload(0, 1));
        store.insert(payload(1, 1));
        store.insert(payload(0, 2));

        assert_eq!(store.table_indices(TableId(0)), vec![0, 2]);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.index_of(PayloadKey::new(TableId(0), 1)), None);
    }
}
