//! # Delta Store
//!
//! Pending changes as an append-only log.
//!
//! Nothing here touches the payload store until `merge`. Reads go through
//! `CombinedView`, which overlays the log on the base store: the last record
//! per key wins, a TOMBSTONE hides the key, a later UPSERT revives it.

use std::collections::HashMap;

use tracing::debug;

use crate::core::{Field, MycoError, MycoResult, Payload, PayloadKey, Position};
use crate::ports::PayloadStore;

// ============================================================================
// Records
// ============================================================================

/// What a record does to its key
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    /// Full field mapping for the key (creates or overwrites)
    Upsert(Vec<Field>),
    /// Removes the key
    Tombstone,
}

impl DeltaOp {
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaOp::Upsert(_) => "UPSERT",
            DeltaOp::Tombstone => "TOMBSTONE",
        }
    }
}

/// One pending change
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    /// Sequence number, increasing across the store's lifetime
    pub seq: u64,
    pub key: PayloadKey,
    pub op: DeltaOp,
}

/// Counts from one merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Records consumed
    pub applied: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Payloads written by the merge that need to settle again
    pub recluster: Vec<PayloadKey>,
}

// ============================================================================
// Store
// ============================================================================

/// Append-only log of pending changes
#[derive(Debug, Clone, Default)]
pub struct DeltaStore {
    records: Vec<DeltaRecord>,
    next_seq: u64,
}

impl DeltaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; returns its sequence number
    pub fn apply(&mut self, key: PayloadKey, op: DeltaOp) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push(DeltaRecord { seq, key, op });
        seq
    }

    /// Pending records, oldest first
    pub fn show(&self) -> &[DeltaRecord] {
        &self.records
    }

    /// Drop the most recent record
    pub fn undo(&mut self) -> MycoResult<DeltaRecord> {
        self.records.pop().ok_or(MycoError::EmptyDelta)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Last record for a key
    pub fn latest(&self, key: PayloadKey) -> Option<&DeltaRecord> {
        self.records.iter().rev().find(|r| r.key == key)
    }

    /// Net effect per key, ordered by each key's first appearance.
    /// Last record wins.
    pub fn reduce(&self) -> Vec<&DeltaRecord> {
        let mut slot: HashMap<PayloadKey, usize> = HashMap::new();
        let mut out: Vec<&DeltaRecord> = Vec::new();
        for record in &self.records {
            match slot.get(&record.key) {
                Some(&i) => out[i] = record,
                None => {
                    slot.insert(record.key, out.len());
                    out.push(record);
                }
            }
        }
        out
    }

    /// Write every record, in sequence order, into the store and clear the
    /// log. New payloads arrive without a position.
    pub fn merge_into(&mut self, store: &mut dyn PayloadStore) -> MergeReport {
        let mut report = MergeReport::default();
        let mut touched: Vec<PayloadKey> = Vec::new();
        for record in self.records.drain(..) {
            report.applied += 1;
            match record.op {
                DeltaOp::Upsert(fields) => {
                    match store.get_mut(record.key) {
                        Some(existing) => {
                            existing.fields = fields;
                            report.updated += 1;
                        }
                        None => {
                            store.insert(Payload::new(record.key.table, record.key.id, fields));
                            report.inserted += 1;
                        }
                    }
                    if !touched.contains(&record.key) {
                        touched.push(record.key);
                    }
                }
                DeltaOp::Tombstone => {
                    if store.remove(record.key).is_some() {
                        report.deleted += 1;
                    }
                    touched.retain(|k| *k != record.key);
                }
            }
        }
        report.recluster = touched;
        debug!(
            applied = report.applied,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Merged delta"
        );
        report
    }
}

// ============================================================================
// Combined view
// ============================================================================

/// One visible row of the combined view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRow {
    pub key: PayloadKey,
    /// Index in the base store, if the key exists there
    pub base: Option<usize>,
    /// Index into `DeltaStore::show()` of the UPSERT that overrides the row
    pub record: Option<usize>,
}

/// Index layer over base store + delta log.
///
/// Base rows keep store order (overridden rows keep their slot); keys that
/// exist only in the log follow, in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct CombinedView {
    rows: Vec<ViewRow>,
    by_key: HashMap<PayloadKey, usize>,
}

impl CombinedView {
    pub fn build(store: &dyn PayloadStore, delta: &DeltaStore) -> Self {
        // key -> index of the winning record
        let mut winner: HashMap<PayloadKey, usize> = HashMap::new();
        let mut order: Vec<PayloadKey> = Vec::new();
        for (i, record) in delta.show().iter().enumerate() {
            if winner.insert(record.key, i).is_none() {
                order.push(record.key);
            }
        }
        let upsert_of = |key: &PayloadKey| -> Result<Option<usize>, ()> {
            match winner.get(key) {
                None => Ok(None),
                Some(&i) => match delta.show()[i].op {
                    DeltaOp::Upsert(_) => Ok(Some(i)),
                    DeltaOp::Tombstone => Err(()),
                },
            }
        };

        let mut view = CombinedView::default();
        for (i, payload) in store.iter().enumerate() {
            let key = payload.key();
            if let Ok(record) = upsert_of(&key) {
                view.push(ViewRow {
                    key,
                    base: Some(i),
                    record,
                });
            }
        }
        for key in order {
            if store.contains(key) {
                continue;
            }
            if let Ok(Some(record)) = upsert_of(&key) {
                view.push(ViewRow {
                    key,
                    base: None,
                    record: Some(record),
                });
            }
        }
        view
    }

    fn push(&mut self, row: ViewRow) {
        self.by_key.insert(row.key, self.rows.len());
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[ViewRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index_of(&self, key: PayloadKey) -> Option<usize> {
        self.by_key.get(&key).copied()
    }

    pub fn get(&self, index: usize) -> Option<&ViewRow> {
        self.rows.get(index)
    }
}

/// Borrowed accessors for a view row
pub struct Overlay<'a> {
    pub store: &'a dyn PayloadStore,
    pub delta: &'a DeltaStore,
    pub view: &'a CombinedView,
}

impl<'a> Overlay<'a> {
    pub fn new(store: &'a dyn PayloadStore, delta: &'a DeltaStore, view: &'a CombinedView) -> Self {
        Self { store, delta, view }
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Base payload behind a row
    pub fn base(&self, row: &ViewRow) -> Option<&'a Payload> {
        row.base.and_then(|i| self.store.at(i))
    }

    /// Visible field values of a row
    pub fn fields(&self, row: &ViewRow) -> &'a [Field] {
        if let Some(i) = row.record {
            if let Some(DeltaRecord {
                op: DeltaOp::Upsert(fields),
                ..
            }) = self.delta.show().get(i)
            {
                return fields;
            }
        }
        self.base(row).map(|p| p.fields.as_slice()).unwrap_or(&[])
    }

    /// Position of a row; pending inserts have none
    pub fn position(&self, row: &ViewRow) -> Option<Position> {
        self.base(row).and_then(|p| p.position)
    }

    /// Build a standalone payload for a row (base metadata + visible fields)
    pub fn materialize(&self, row: &ViewRow) -> Payload {
        match self.base(row) {
            Some(base) => {
                let mut p = base.clone();
                if row.record.is_some() {
                    p.fields = self.fields(row).to_vec();
                }
                p
            }
            None => Payload::new(row.key.table, row.key.id, self.fields(row).to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;
    use crate::core::{TableId, Value};
    use proptest::prelude::*;

    const T: TableId = TableId(0);

    fn key(id: i64) -> PayloadKey {
        PayloadKey::new(T, id)
    }

    fn upsert(title: &str) -> DeltaOp {
        DeltaOp::Upsert(vec![Field::new("Title", title)])
    }

    fn base() -> MemoryStore {
        let mut store = MemoryStore::new();
        for id in 1..=3 {
            let mut p = Payload::new(T, id, vec![Field::new("Title", format!("base{}", id))]);
            p.position = Some(Position::new(id as f32, 0.0));
            store.insert(p);
        }
        store
    }

    #[test]
    fn test_undo_on_empty_fails() {
        let mut delta = DeltaStore::new();
        assert!(matches!(delta.undo(), Err(MycoError::EmptyDelta)));
    }

    #[test]
    fn test_apply_show_undo() {
        let mut delta = DeltaStore::new();
        delta.apply(key(1), upsert("a"));
        delta.apply(key(2), DeltaOp::Tombstone);
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.show()[1].op.kind(), "TOMBSTONE");

        let popped = delta.undo().unwrap();
        assert_eq!(popped.key, key(2));
        assert_eq!(delta.show().len(), 1);
        // Sequence numbers keep increasing after undo
        assert_eq!(delta.apply(key(3), upsert("c")), 2);
    }

    #[test]
    fn test_reduce_last_record_wins() {
        let mut delta = DeltaStore::new();
        delta.apply(key(7), upsert("first"));
        delta.apply(key(8), upsert("other"));
        delta.apply(key(7), DeltaOp::Tombstone);
        let net = delta.reduce();
        assert_eq!(net.len(), 2);
        assert_eq!(net[0].key, key(7));
        assert_eq!(net[0].op, DeltaOp::Tombstone);

        delta.apply(key(7), upsert("revived"));
        assert_eq!(delta.reduce()[0].op, upsert("revived"));
    }

    #[test]
    fn test_overlay_does_not_touch_base() {
        let store = base();
        let mut delta = DeltaStore::new();
        delta.apply(key(2), upsert("new"));
        delta.apply(key(3), DeltaOp::Tombstone);
        delta.apply(key(9), upsert("fresh"));

        let view = CombinedView::build(&store, &delta);
        let overlay = Overlay::new(&store, &delta, &view);

        let keys: Vec<_> = view.rows().iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![key(1), key(2), key(9)]);
        let row2 = view.get(view.index_of(key(2)).unwrap()).unwrap();
        assert_eq!(overlay.fields(row2)[0].value, Value::from("new"));
        assert_eq!(overlay.position(row2), Some(Position::new(2.0, 0.0)));
        let row9 = view.get(2).unwrap();
        assert_eq!(overlay.position(row9), None);
        assert_eq!(overlay.materialize(row9).key(), key(9));

        // base untouched
        assert_eq!(store.get(key(2)).unwrap().field("Title"), Some(&Value::from("base2")));
        assert!(store.contains(key(3)));
    }

    #[test]
    fn test_merge_applies_in_order() {
        let mut store = base();
        let mut delta = DeltaStore::new();
        delta.apply(key(7), upsert("seven"));
        delta.apply(key(7), DeltaOp::Tombstone);
        delta.apply(key(1), upsert("one"));
        delta.apply(key(2), DeltaOp::Tombstone);
        delta.apply(key(4), upsert("four"));

        let report = delta.merge_into(&mut store);

        assert!(delta.is_empty());
        assert_eq!(report.applied, 5);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.recluster, vec![key(1), key(4)]);
        assert!(!store.contains(key(7)));
        assert!(!store.contains(key(2)));
        assert_eq!(store.get(key(1)).unwrap().field("Title"), Some(&Value::from("one")));
        // Updated payloads keep their position; new ones have none
        assert!(store.get(key(1)).unwrap().is_placed());
        assert!(!store.get(key(4)).unwrap().is_placed());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_undo_removes_exactly_the_last_record(ops in prop::collection::vec((1i64..6, any::<bool>()), 1..20)) {
            let mut delta = DeltaStore::new();
            for (id, tomb) in &ops {
                let op = if *tomb { DeltaOp::Tombstone } else { upsert("x") };
                delta.apply(key(*id), op);
            }
            let before: Vec<DeltaRecord> = delta.show().to_vec();
            let popped = delta.undo().unwrap();
            prop_assert_eq!(&popped, before.last().unwrap());
            prop_assert_eq!(delta.show(), &before[..before.len() - 1]);
        }

        #[test]
        fn prop_view_matches_merge(ops in prop::collection::vec((1i64..6, any::<bool>()), 0..20)) {
            let mut store = base();
            let mut delta = DeltaStore::new();
            for (i, (id, tomb)) in ops.iter().enumerate() {
                let op = if *tomb { DeltaOp::Tombstone } else { upsert(&format!("v{}", i)) };
                delta.apply(key(*id), op);
            }
            let view = CombinedView::build(&store, &delta);
            let overlay = Overlay::new(&store, &delta, &view);
            let mut seen: Vec<(PayloadKey, Vec<Field>)> = view
                .rows()
                .iter()
                .map(|r| (r.key, overlay.fields(r).to_vec()))
                .collect();

            delta.merge_into(&mut store);
            let mut merged: Vec<(PayloadKey, Vec<Field>)> =
                store.iter().map(|p| (p.key(), p.fields.clone())).collect();
            seen.sort_by_key(|(k, _)| *k);
            merged.sort_by_key(|(k, _)| *k);
            prop_assert_eq!(seen, merged);
        }
    }
}
