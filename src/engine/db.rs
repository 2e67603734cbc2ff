//! # MycoDb Engine
//!
//! The handle every caller talks to.
//!
//! This struct wires together:
//! - Storage (`PayloadStore` port) and the spatial index (`SpatialLookup` port)
//! - Field grids and the swarm used for ingestion and re-clustering
//! - The delta store and its combined view
//! - Session state: focus, radius, row limit, last results, last error
//!
//! All state lives in the handle; there are no globals. One thread at a
//! time may use a handle.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::adapters::image::{self, DecodedImage};
use crate::adapters::index::GridIndex;
use crate::adapters::rules::{link_payload, IngestRules};
use crate::adapters::sql_dump::{load_sql_dump, populate, Dataset};
use crate::adapters::storage::MemoryStore;
use crate::core::config::MycoConfig;
use crate::core::{
    Field, FocusState, MycoError, MycoResult, Payload, PayloadKey, Position, Schema, Table, TableId, Value,
};
use crate::delta::{CombinedView, DeltaOp, DeltaRecord, DeltaStore, MergeReport, Overlay};
use crate::ports::{PayloadStore, SpatialLookup};
use crate::query::{Explain, Outcome, QueryContext, ResultSet};
use crate::swarm::{CancelToken, FieldSet, IngestReport, IngestScope, Swarm};

use super::inspect::{DbStats, TableDescription, TableStats};

/// The main MycoDB engine
pub struct MycoDb {
    /// Configuration
    config: MycoConfig,

    /// Payload storage (ground truth)
    store: Box<dyn PayloadStore>,

    /// Region lookup over placed payloads
    index: Box<dyn SpatialLookup>,

    /// Field grids (swarm memory)
    fields: FieldSet,

    schema: Schema,

    /// Rules of the last ingest, reused when re-clustering after a merge
    rules: IngestRules,

    /// Pending changes
    delta: DeltaStore,

    /// Store + delta, rebuilt after every change to either
    view: CombinedView,

    focus: FocusState,
    limit: Option<usize>,

    last_results: Option<ResultSet>,
    last_error: Option<String>,
    last_ingest: Option<IngestReport>,
}

impl Default for MycoDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MycoDb {
    /// Empty engine with the default configuration
    pub fn new() -> Self {
        let config = MycoConfig::default();
        let store = Box::new(MemoryStore::new());
        let index = Box::new(GridIndex::new(config.width, config.height, config.bucket_size));
        Self::assemble(config, store, index)
    }

    /// Empty engine with a validated configuration
    pub fn with_config(config: MycoConfig) -> MycoResult<Self> {
        config.validate()?;
        let store = Box::new(MemoryStore::new());
        let index = Box::new(GridIndex::new(config.width, config.height, config.bucket_size));
        Ok(Self::assemble(config, store, index))
    }

    /// Create with custom adapters
    pub fn with_adapters(
        config: MycoConfig,
        store: Box<dyn PayloadStore>,
        index: Box<dyn SpatialLookup>,
    ) -> MycoResult<Self> {
        config.validate()?;
        let mut db = Self::assemble(config, store, index);
        db.reindex();
        Ok(db)
    }

    fn assemble(config: MycoConfig, store: Box<dyn PayloadStore>, index: Box<dyn SpatialLookup>) -> Self {
        let fields = FieldSet::new(config.width, config.height, 0, &config.fields);
        let focus = FocusState::new(config.default_radius);
        let mut db = Self {
            config,
            store,
            index,
            fields,
            schema: Schema::new(),
            rules: IngestRules::default(),
            delta: DeltaStore::new(),
            view: CombinedView::default(),
            focus,
            limit: None,
            last_results: None,
            last_error: None,
            last_ingest: None,
        };
        db.refresh_view();
        db
    }

    pub fn config(&self) -> &MycoConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Base store (without pending changes)
    pub fn store(&self) -> &dyn PayloadStore {
        self.store.as_ref()
    }

    // ========================================================================
    // ERRORS
    // ========================================================================

    /// Message of the most recent failure; kept until the next failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, err: &MycoError) {
        self.last_error = Some(err.to_string());
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    fn record<T>(&mut self, result: MycoResult<T>) -> MycoResult<T> {
        if let Err(e) = &result {
            debug!(error = %e, "Engine call failed");
            self.last_error = Some(e.to_string());
        }
        result
    }

    // ========================================================================
    // INTERNAL STATE SYNC
    // ========================================================================

    fn refresh_view(&mut self) {
        self.view = CombinedView::build(self.store.as_ref(), &self.delta);
    }

    fn reindex(&mut self) {
        self.index.rebuild(&mut self.store.iter());
        self.refresh_view();
    }

    fn reset(&mut self, schema: Schema, width: usize, height: usize) {
        self.store.clear();
        self.schema = schema;
        self.config.width = width;
        self.config.height = height;
        self.index = Box::new(GridIndex::new(width, height, self.config.bucket_size));
        self.delta = DeltaStore::new();
        self.focus.center = None;
        self.last_results = None;
    }

    fn context(&self) -> QueryContext<'_> {
        QueryContext {
            schema: &self.schema,
            rows: Overlay::new(self.store.as_ref(), &self.delta, &self.view),
            index: self.index.as_ref(),
            focus: self.focus,
            limit: self.limit,
        }
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Serialize the base state. Pending delta records are not included.
    pub fn save_bytes(&self) -> Vec<u8> {
        if !self.delta.is_empty() {
            warn!(pending = self.delta.len(), "Saving with unmerged delta records; they are not persisted");
        }
        image::encode(
            self.config.width,
            self.config.height,
            &self.schema,
            self.store.as_ref(),
            Some(&self.fields),
        )
    }

    pub fn save(&mut self, path: &Path) -> MycoResult<()> {
        let bytes = self.save_bytes();
        let result = std::fs::write(path, &bytes).map_err(MycoError::from);
        if result.is_ok() {
            info!(path = %path.display(), bytes = bytes.len(), payloads = self.store.len(), "Saved image");
        }
        self.record(result)
    }

    /// Replace the whole state with a decoded image
    pub fn load_bytes(&mut self, bytes: &[u8]) -> MycoResult<()> {
        let decoded = image::decode(bytes);
        let decoded = self.record(decoded)?;
        self.install(decoded);
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> MycoResult<()> {
        let bytes = std::fs::read(path).map_err(|e| MycoError::LoadFailure(format!("{}: {}", path.display(), e)));
        let bytes = self.record(bytes)?;
        self.load_bytes(&bytes)?;
        info!(path = %path.display(), payloads = self.store.len(), tables = self.schema.len(), "Loaded image");
        Ok(())
    }

    fn install(&mut self, image: DecodedImage) {
        let tables = image.schema.len();
        self.reset(image.schema, image.width, image.height);
        for payload in image.payloads {
            self.store.insert(payload);
        }
        self.fields = match image.fields {
            Some(fields) => fields,
            None => FieldSet::new(image.width, image.height, tables, &self.config.fields),
        };
        self.fields.ensure_tables(tables, &self.config.fields);
        self.reindex();
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Load a SQL dump (and optional rules file) and run a full ingest
    pub fn ingest_sql(&mut self, dump: &Path, rules: Option<&Path>) -> MycoResult<IngestReport> {
        let prepared = load_sql_dump(dump).and_then(|dataset| {
            let rules = rules.map(IngestRules::from_json_file).transpose()?.unwrap_or_default();
            Ok((dataset, rules))
        });
        let (dataset, rules) = self.record(prepared)?;
        Ok(self.ingest_dataset(&dataset, rules, None))
    }

    /// Replace the state with a dataset and let the swarm lay it out
    pub fn ingest_dataset(&mut self, dataset: &Dataset, rules: IngestRules, cancel: Option<&CancelToken>) -> IngestReport {
        self.reset(Schema::new(), self.config.width, self.config.height);
        let rows = populate(dataset, &mut self.schema, self.store.as_mut());
        let linked = rules.link(&mut self.schema, self.store.as_mut());
        self.rules = rules;
        self.fields = FieldSet::new(self.config.width, self.config.height, self.schema.len(), &self.config.fields);
        info!(rows, linked, tables = self.schema.len(), "Starting ingest");
        self.run_swarm(&IngestScope::All, self.config.ingest.steps, cancel)
    }

    /// Re-run the swarm over every payload with a fresh step budget
    pub fn swarm_sort(&mut self, steps: usize, cancel: Option<&CancelToken>) -> IngestReport {
        self.run_swarm(&IngestScope::All, steps, cancel)
    }

    fn run_swarm(&mut self, scope: &IngestScope, steps: usize, cancel: Option<&CancelToken>) -> IngestReport {
        let hints = self.rules.cluster_hints(&self.schema, self.store.as_ref());
        let tables = self.schema.len();
        let report = {
            let mut swarm = Swarm::new(&self.config);
            swarm.run(self.store.as_mut(), &mut self.fields, tables, &hints, scope, steps, cancel)
        };
        self.reindex();

        info!(
            steps = report.steps,
            converged = report.converged,
            cancelled = report.cancelled,
            placed = report.placed,
            resolved = report.resolved,
            dangling = report.dangling_count(),
            "Swarm run finished"
        );
        if report.dangling_count() > 0 {
            warn!(dangling = report.dangling_count(), "Payloads with unresolved foreign keys");
        }
        self.last_ingest = Some(report.clone());
        report
    }

    pub fn last_ingest(&self) -> Option<&IngestReport> {
        self.last_ingest.as_ref()
    }

    /// Move one payload and update the index in place
    pub fn relocate(&mut self, key: PayloadKey, position: Position) -> MycoResult<()> {
        let position = position.clamped(self.config.width, self.config.height);
        let result = match self.store.get_mut(key) {
            Some(payload) => {
                payload.position = Some(position);
                Ok(())
            }
            None => Err(MycoError::PayloadNotFound(key.to_string())),
        };
        self.record(result)?;
        self.index.update(key, position);
        Ok(())
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    pub fn focus(&self) -> FocusState {
        self.focus
    }

    pub fn radius(&self) -> f32 {
        self.focus.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.focus.radius = radius.max(0.0);
    }

    pub fn set_focus(&mut self, center: Position) {
        self.focus.center = Some(center);
    }

    /// Clear the focus center; the radius stays
    pub fn unfocus(&mut self) {
        self.focus.center = None;
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Focus on a payload's position. Without a table the first payload in
    /// view order with that id wins.
    pub fn goto(&mut self, id: i64, table: Option<&str>) -> MycoResult<Position> {
        let found = self
            .locate(id, table)
            .and_then(|index| {
                let row = self.view.get(index).copied();
                row.and_then(|r| self.overlay().position(&r))
                    .ok_or_else(|| MycoError::PayloadNotFound(format!("{} has no position yet (merge first)", id)))
            });
        let position = self.record(found)?;
        self.focus.center = Some(position);
        debug!(id, x = position.x, y = position.y, "Focus set");
        Ok(position)
    }

    fn overlay(&self) -> Overlay<'_> {
        Overlay::new(self.store.as_ref(), &self.delta, &self.view)
    }

    fn locate(&self, id: i64, table: Option<&str>) -> MycoResult<usize> {
        let not_found = || MycoError::PayloadNotFound(match table {
            Some(t) => format!("{}#{}", t, id),
            None => id.to_string(),
        });
        match table {
            Some(name) => {
                let table = self
                    .schema
                    .find(name)
                    .ok_or_else(|| MycoError::UnknownTable(name.to_string()))?;
                self.view.index_of(PayloadKey::new(table, id)).ok_or_else(not_found)
            }
            None => self
                .view
                .rows()
                .iter()
                .position(|r| r.key.id == id)
                .ok_or_else(not_found),
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    fn keep(&mut self, result: MycoResult<ResultSet>) -> MycoResult<ResultSet> {
        let result = self.record(result)?;
        self.last_results = Some(result.clone());
        Ok(result)
    }

    /// Primary-key lookup with an explicit radius and optional center
    pub fn query_by_id(&mut self, table: &str, id: i64, radius: f32, center: Option<Position>) -> MycoResult<ResultSet> {
        let result = self.context().by_id(table, id, radius, center);
        self.keep(result)
    }

    /// Column-equality lookup with an explicit radius and optional center
    pub fn query_by_column(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
        radius: f32,
        center: Option<Position>,
    ) -> MycoResult<ResultSet> {
        let result = self.context().by_column(table, column, value, radius, center);
        self.keep(result)
    }

    /// `<table> <id>` under the session focus
    pub fn lookup(&mut self, table: &str, id: i64) -> MycoResult<ResultSet> {
        let FocusState { center, radius } = self.focus;
        self.query_by_id(table, id, radius, center)
    }

    /// `<table> <col>=<val>` under the session focus
    pub fn find(&mut self, table: &str, column: &str, value: &Value) -> MycoResult<ResultSet> {
        let FocusState { center, radius } = self.focus;
        self.query_by_column(table, column, value, radius, center)
    }

    /// `<col>=<val>` across all tables under the session focus
    pub fn find_any(&mut self, column: &str, value: &Value) -> MycoResult<ResultSet> {
        let FocusState { center, radius } = self.focus;
        let result = self.context().by_column_any(column, value, radius, center);
        self.keep(result)
    }

    /// Run one SQL-light statement. SELECTs become the last results; DML is
    /// appended to the delta store.
    pub fn sql(&mut self, text: &str) -> MycoResult<Outcome> {
        let outcome = self.context().sql(text);
        match self.record(outcome)? {
            Outcome::Rows(rs) => {
                self.last_results = Some(rs.clone());
                Ok(Outcome::Rows(rs))
            }
            Outcome::Mutations(ops) => {
                for (key, op) in ops.iter().cloned() {
                    self.apply(key, op)?;
                }
                Ok(Outcome::Mutations(ops))
            }
        }
    }

    /// `explain` of the last query
    pub fn explain(&self) -> Option<&Explain> {
        self.last_results.as_ref().map(|r| &r.explain)
    }

    pub fn results(&self) -> Option<&ResultSet> {
        self.last_results.as_ref()
    }

    pub fn result_count(&self) -> usize {
        self.last_results.as_ref().map_or(0, ResultSet::len)
    }

    /// View indices of the last results (rows without a payload are skipped)
    pub fn result_indices(&self) -> Vec<usize> {
        self.last_results
            .as_ref()
            .map(|r| r.keys.iter().flatten().filter_map(|k| self.view.index_of(*k)).collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // PAYLOAD ACCESS (view indices)
    // ========================================================================

    /// Visible payloads (store + delta)
    pub fn payload_count(&self) -> usize {
        self.view.len()
    }

    /// View index of a payload by id
    pub fn find_payload_by_id(&self, id: i64, table: Option<&str>) -> Option<usize> {
        self.locate(id, table).ok()
    }

    /// Visible payload at a view index
    pub fn payload_at(&self, index: usize) -> Option<Payload> {
        let row = self.view.get(index)?;
        Some(self.overlay().materialize(row))
    }

    pub fn get(&self, key: PayloadKey) -> Option<Payload> {
        self.view.index_of(key).and_then(|i| self.payload_at(i))
    }

    // ========================================================================
    // DELTA
    // ========================================================================

    /// Append a record. With auto-merge at N, an append that finds N records
    /// already pending merges everything, itself included.
    pub fn apply(&mut self, key: PayloadKey, op: DeltaOp) -> MycoResult<Option<MergeReport>> {
        let checked = match self.schema.table(key.table) {
            Some(_) => Ok(()),
            None => Err(MycoError::UnknownTable(key.table.to_string())),
        };
        self.record(checked)?;

        let pending = self.delta.len();
        let seq = self.delta.apply(key, op);
        debug!(seq, key = %key, "Delta record appended");
        self.refresh_view();

        match self.config.auto_merge {
            Some(threshold) if pending >= threshold => {
                info!(threshold, "Auto-merge threshold reached");
                Ok(Some(self.merge()))
            }
            _ => Ok(None),
        }
    }

    /// UPSERT with a full field mapping
    pub fn upsert(&mut self, table: &str, id: i64, fields: Vec<Field>) -> MycoResult<Option<MergeReport>> {
        let table = self.table_id(table)?;
        self.apply(PayloadKey::new(table, id), DeltaOp::Upsert(fields))
    }

    pub fn delete(&mut self, table: &str, id: i64) -> MycoResult<Option<MergeReport>> {
        let table = self.table_id(table)?;
        self.apply(PayloadKey::new(table, id), DeltaOp::Tombstone)
    }

    fn table_id(&mut self, name: &str) -> MycoResult<TableId> {
        let found = self
            .schema
            .find(name)
            .ok_or_else(|| MycoError::UnknownTable(name.to_string()));
        self.record(found)
    }

    pub fn show(&self) -> &[DeltaRecord] {
        self.delta.show()
    }

    pub fn pending(&self) -> usize {
        self.delta.len()
    }

    pub fn undo(&mut self) -> MycoResult<DeltaRecord> {
        let undone = self.delta.undo();
        let record = self.record(undone)?;
        self.refresh_view();
        Ok(record)
    }

    pub fn set_auto_merge(&mut self, threshold: Option<usize>) {
        self.config.auto_merge = threshold;
    }

    /// Write the delta into the store, then let the written payloads settle
    /// with a bounded swarm run
    pub fn merge(&mut self) -> MergeReport {
        let report = self.delta.merge_into(self.store.as_mut());
        for key in &report.recluster {
            if let Some(payload) = self.store.get_mut(*key) {
                link_payload(&self.schema, payload);
            }
        }
        info!(
            applied = report.applied,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Merged delta"
        );
        if report.recluster.is_empty() {
            self.reindex();
        } else {
            debug!(payloads = report.recluster.len(), "Re-clustering merged payloads");
            let scope = IngestScope::Subset(report.recluster.clone());
            self.run_swarm(&scope, self.config.ingest.recluster_steps, None);
        }
        report
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn table_names(&self) -> Vec<&str> {
        self.schema.tables().iter().map(|t| t.name.as_str()).collect()
    }

    pub fn table_schema(&mut self, name: &str) -> MycoResult<&Table> {
        let table = self.table_id(name)?;
        self.schema
            .table(table)
            .ok_or_else(|| MycoError::UnknownTable(name.to_string()))
    }

    pub fn stats(&self) -> DbStats {
        let mut tables: Vec<TableStats> = self
            .schema
            .tables()
            .iter()
            .map(|t| TableStats {
                name: t.name.clone(),
                rows: 0,
                placed: 0,
                dangling: 0,
            })
            .collect();
        for p in self.store.iter() {
            if let Some(t) = tables.get_mut(p.table.index()) {
                t.rows += 1;
                t.placed += usize::from(p.is_placed());
                t.dangling += usize::from(p.dangling);
            }
        }
        DbStats {
            payloads: self.store.len(),
            pending: self.delta.len(),
            dangling: tables.iter().map(|t| t.dangling).sum(),
            tables,
            width: self.config.width,
            height: self.config.height,
        }
    }

    pub fn describe(&mut self, name: &str) -> MycoResult<TableDescription> {
        let id = self.table_id(name)?;
        let Some(table) = self.schema.table(id) else {
            return Err(MycoError::UnknownTable(name.to_string()));
        };
        let parents = table
            .foreign_keys
            .iter()
            .map(|fk| self.schema.name(fk.parent).unwrap_or("?").to_string())
            .collect();
        Ok(TableDescription::new(
            table,
            parents,
            self.store.iter().filter(|p| p.table == id),
        ))
    }
}
