//! # Ports
//!
//! Trait contracts the engine talks to. Adapters implement them.
//!
//! - `PayloadStore` - owns payloads, insertion-ordered, O(1) key lookup
//! - `SpatialLookup` - position-keyed, non-owning view used for focus queries

use crate::core::{Payload, PayloadKey, Position, TableId};

/// Ground-truth record storage
///
/// Payloads keep their insertion order; `at(i)` indices are stable until the
/// next `remove`.
pub trait PayloadStore: Send {
    /// Insert a payload, replacing one with the same key in place.
    /// Returns its index.
    fn insert(&mut self, payload: Payload) -> usize;

    /// Remove a payload by key
    fn remove(&mut self, key: PayloadKey) -> Option<Payload>;

    /// Index of a payload by key (O(1))
    fn index_of(&self, key: PayloadKey) -> Option<usize>;

    /// Payload at an index
    fn at(&self, index: usize) -> Option<&Payload>;

    /// Mutable payload at an index
    fn at_mut(&mut self, index: usize) -> Option<&mut Payload>;

    /// Number of stored payloads
    fn len(&self) -> usize;

    /// Iterate in insertion order
    fn iter(&self) -> Box<dyn Iterator<Item = &Payload> + '_>;

    /// Drop everything
    fn clear(&mut self);

    /// Get a payload by key
    fn get(&self, key: PayloadKey) -> Option<&Payload> {
        self.index_of(key).and_then(|i| self.at(i))
    }

    /// Mutable payload by key
    fn get_mut(&mut self, key: PayloadKey) -> Option<&mut Payload> {
        match self.index_of(key) {
            Some(i) => self.at_mut(i),
            None => None,
        }
    }

    fn contains(&self, key: PayloadKey) -> bool {
        self.index_of(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of all payloads of one table, in insertion order
    fn table_indices(&self, table: TableId) -> Vec<usize> {
        self.iter()
            .enumerate()
            .filter(|(_, p)| p.table == table)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Region lookup from coordinates to payload keys
pub trait SpatialLookup: Send {
    /// Add a key at a position (replaces an existing entry)
    fn insert(&mut self, key: PayloadKey, position: Position);

    /// Move a key; inserts it if unknown
    fn update(&mut self, key: PayloadKey, position: Position) {
        self.insert(key, position);
    }

    /// Drop a key
    fn remove(&mut self, key: PayloadKey) -> bool;

    /// Keys within `radius` of `center` (exact Euclidean filter)
    fn query_region(&self, center: Position, radius: f32) -> Vec<PayloadKey>;

    /// Every indexed key
    fn query_all(&self) -> Vec<PayloadKey>;

    /// Replace the whole index from the placed payloads of a store
    fn rebuild(&mut self, payloads: &mut dyn Iterator<Item = &Payload>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
