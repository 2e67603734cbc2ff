//! # Query Engine
//!
//! Evaluates lookups and SQL-light statements against the combined
//! (store + delta) view.
//!
//! Candidate selection is the one place where layout matters: with a focus
//! center (or a `RADIUS` clause) the candidate set comes from the spatial
//! index and costs O(payloads in the circle); otherwise it is the whole
//! table. Results keep view order unless `ORDER BY` says otherwise.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::core::{
    Field, FocusState, MycoError, MycoResult, PayloadKey, Position, Table, TableId, Value,
};
use crate::delta::{DeltaOp, Overlay};
use crate::ports::SpatialLookup;

use super::eval::{bind, row_key, value_key, Relation, Tuple};
use super::result::{Explain, ResultSet};
use super::sql::{
    aggregate_label, parse, AggFunc, CmpOp, Delete, Expr, Insert, Join, JoinKind, Operand,
    OrderTarget, Query, Select, SelectItem, Statement, Update,
};

/// What a statement produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(ResultSet),
    /// DML turned into delta records, in statement order
    Mutations(Vec<(PayloadKey, DeltaOp)>),
}

/// Materialized rows of a SELECT or CTE
#[derive(Debug, Clone, Default)]
struct Output {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    keys: Vec<Option<PayloadKey>>,
}

impl Output {
    fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let mut rows = Vec::with_capacity(self.rows.len());
        let mut keys = Vec::with_capacity(self.keys.len());
        for (row, key) in self.rows.drain(..).zip(self.keys.drain(..)) {
            if seen.insert(row_key(&row)) {
                rows.push(row);
                keys.push(key);
            }
        }
        self.rows = rows;
        self.keys = keys;
    }

    fn window(&mut self, offset: Option<usize>, limit: Option<usize>) {
        let skip = offset.unwrap_or(0).min(self.rows.len());
        self.rows.drain(..skip);
        self.keys.drain(..skip);
        if let Some(n) = limit {
            self.rows.truncate(n);
            self.keys.truncate(n);
        }
    }
}

type Ctes = HashMap<String, Output>;

fn malformed(msg: impl Into<String>) -> MycoError {
    MycoError::MalformedQuery(msg.into())
}

/// Everything a query reads, borrowed from the engine for one call
pub struct QueryContext<'a> {
    pub schema: &'a crate::core::Schema,
    pub rows: Overlay<'a>,
    pub index: &'a dyn SpatialLookup,
    pub focus: FocusState,
    /// Session row limit, applied when a statement has no LIMIT
    pub limit: Option<usize>,
}

impl<'a> QueryContext<'a> {
    // ========================================================================
    // Candidate sets
    // ========================================================================

    fn table(&self, name: &str) -> MycoResult<&'a Table> {
        self.schema
            .by_name(name)
            .ok_or_else(|| MycoError::UnknownTable(name.to_string()))
    }

    /// View indices of one table, in view order
    fn table_rows(&self, table: TableId) -> Vec<usize> {
        self.rows
            .view
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.key.table == table)
            .map(|(i, _)| i)
            .collect()
    }

    /// View indices inside a circle, in view order. Unplaced and deleted
    /// payloads never appear.
    fn region_rows(&self, table: Option<TableId>, center: Position, radius: f32) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .index
            .query_region(center, radius)
            .into_iter()
            .filter(|k| table.map_or(true, |t| k.table == t))
            .filter_map(|k| self.rows.view.index_of(k))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    fn field_of(&self, index: usize, column: &str) -> Option<&'a Value> {
        let row = self.rows.view.get(index)?;
        self.rows
            .fields(row)
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(column))
            .map(|f| &f.value)
    }

    fn position_of(&self, key: PayloadKey) -> Option<Position> {
        let index = self.rows.view.index_of(key)?;
        self.rows.view.get(index).and_then(|r| self.rows.position(r))
    }

    /// Visible values of a row laid out in the table's column order
    fn row_values(&self, index: usize, table: &Table) -> Vec<Value> {
        table
            .columns
            .iter()
            .map(|c| self.field_of(index, c).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn key_at(&self, index: usize) -> Option<PayloadKey> {
        self.rows.view.get(index).map(|r| r.key)
    }

    fn table_result(&self, table: &Table, hits: Vec<usize>, mut explain: Explain) -> ResultSet {
        explain.matches = hits.len();
        explain.add_table(&table.name);
        let take = self.limit.unwrap_or(usize::MAX);
        let hits: Vec<usize> = hits.into_iter().take(take).collect();
        ResultSet {
            columns: table.columns.clone(),
            rows: hits.iter().map(|&i| self.row_values(i, table)).collect(),
            keys: hits.iter().map(|&i| self.key_at(i)).collect(),
            explain,
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Primary-key lookup. Without a center this is a direct key probe and
    /// ignores the radius; with one, only payloads inside the circle match.
    pub fn by_id(&self, table: &str, id: i64, radius: f32, center: Option<Position>) -> MycoResult<ResultSet> {
        let meta = self.table(table)?;
        let key = PayloadKey::new(meta.id, id);
        match center {
            None => {
                let hits: Vec<usize> = self.rows.view.index_of(key).into_iter().collect();
                let mut explain = Explain::new("primary-key");
                explain.candidates = hits.len();
                Ok(self.table_result(meta, hits, explain))
            }
            Some(center) => {
                let candidates = self.region_rows(Some(meta.id), center, radius);
                let mut explain = Explain::new("region-scan").focus(center, radius);
                explain.candidates = candidates.len();
                let hits = candidates.into_iter().filter(|&i| self.key_at(i) == Some(key)).collect();
                Ok(self.table_result(meta, hits, explain))
            }
        }
    }

    /// `table column = value`.
    ///
    /// Without a center, a foreign-key column is searched first within
    /// `radius` of the referenced parent, falling back to a table scan when
    /// that finds nothing.
    pub fn by_column(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        radius: f32,
        center: Option<Position>,
    ) -> MycoResult<ResultSet> {
        let meta = self.table(table)?;
        let column = meta.column(column).ok_or_else(|| MycoError::UnknownColumn {
            table: meta.name.clone(),
            column: column.to_string(),
        })?;
        let matches = |i: &usize| self.field_of(*i, column).map_or(false, |v| v.sql_eq(value));

        if let Some(center) = center {
            let candidates = self.region_rows(Some(meta.id), center, radius);
            let mut explain = Explain::new("region-scan").focus(center, radius);
            explain.candidates = candidates.len();
            let hits = candidates.into_iter().filter(matches).collect();
            return Ok(self.table_result(meta, hits, explain));
        }

        let is_pk = meta
            .primary_key_column()
            .map_or(false, |pk| pk.eq_ignore_ascii_case(column));
        if let (true, Some(id)) = (is_pk, value.as_i64()) {
            return self.by_id(&meta.name, id, radius, None);
        }

        let mut strategy = "table-scan";
        if let (Some(fk), Some(parent_id)) = (meta.foreign_key(column), value.as_i64()) {
            if let Some(parent) = self.position_of(PayloadKey::new(fk.parent, parent_id)) {
                let candidates = self.region_rows(Some(meta.id), parent, radius);
                let local_candidates = candidates.len();
                let hits: Vec<usize> = candidates.into_iter().filter(matches).collect();
                if !hits.is_empty() {
                    let mut explain = Explain::new("fk-local").focus(parent, radius);
                    explain.candidates = local_candidates;
                    return Ok(self.table_result(meta, hits, explain));
                }
            }
            strategy = "fk-global-fallback";
        }

        let candidates = self.table_rows(meta.id);
        let mut explain = Explain::new(strategy);
        explain.candidates = candidates.len();
        let hits = candidates.into_iter().filter(matches).collect();
        Ok(self.table_result(meta, hits, explain))
    }

    /// `column = value` across every table that has the column. Tables
    /// without it are skipped.
    pub fn by_column_any(
        &self,
        column: &str,
        value: &Value,
        radius: f32,
        center: Option<Position>,
    ) -> MycoResult<ResultSet> {
        let mut explain = match center {
            Some(c) => Explain::new("region-scan").focus(c, radius),
            None => Explain::new("global-scan"),
        };
        let mut hits = Vec::new();
        for table in self.schema.tables().iter().filter(|t| t.has_column(column)) {
            explain.add_table(&table.name);
            let candidates = match center {
                Some(c) => self.region_rows(Some(table.id), c, radius),
                None => self.table_rows(table.id),
            };
            explain.candidates += candidates.len();
            hits.extend(
                candidates
                    .into_iter()
                    .filter(|&i| self.field_of(i, column).map_or(false, |v| v.sql_eq(value))),
            );
        }
        hits.sort_unstable();
        explain.matches = hits.len();
        hits.truncate(self.limit.unwrap_or(usize::MAX));

        let rows = hits
            .iter()
            .map(|&i| {
                let key = self.key_at(i);
                vec![
                    key.and_then(|k| self.schema.name(k.table))
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    key.map(|k| Value::Integer(k.id)).unwrap_or(Value::Null),
                    self.field_of(i, column).cloned().unwrap_or(Value::Null),
                ]
            })
            .collect();
        Ok(ResultSet {
            columns: vec!["table".into(), "id".into(), column.to_string()],
            rows,
            keys: hits.iter().map(|&i| self.key_at(i)).collect(),
            explain,
        })
    }

    // ========================================================================
    // SQL
    // ========================================================================

    pub fn sql(&self, text: &str) -> MycoResult<Outcome> {
        let statement = parse(text)?;
        self.execute(&statement)
    }

    pub fn execute(&self, statement: &Statement) -> MycoResult<Outcome> {
        match statement {
            Statement::Query(query) => self.select_query(query).map(Outcome::Rows),
            Statement::Insert(insert) => self.insert(insert).map(Outcome::Mutations),
            Statement::Update(update) => self.update(update).map(Outcome::Mutations),
            Statement::Delete(delete) => self.delete(delete).map(Outcome::Mutations),
        }
    }

    fn select_query(&self, query: &Query) -> MycoResult<ResultSet> {
        let mut explain = Explain::new("table-scan");
        let mut output = self.run_query(query, &Ctes::new(), &mut explain)?;
        if explain.focused {
            explain.strategy = "region-scan";
        }
        explain.matches = output.rows.len();
        if query.selects.iter().all(|s| s.limit.is_none()) {
            output.window(None, self.limit);
        }
        debug!(
            candidates = explain.candidates,
            matches = explain.matches,
            focused = explain.focused,
            "Executed query"
        );
        Ok(ResultSet {
            columns: output.columns,
            rows: output.rows,
            keys: output.keys,
            explain,
        })
    }

    fn run_query(&self, query: &Query, outer: &Ctes, explain: &mut Explain) -> MycoResult<Output> {
        let mut ctes = outer.clone();
        for (name, sub) in &query.ctes {
            let out = self.run_query(sub, &ctes, explain)?;
            ctes.insert(name.to_ascii_lowercase(), out);
        }

        let mut selects = query.selects.iter();
        let first = selects
            .next()
            .ok_or_else(|| malformed("query has no SELECT"))?;
        let mut result = self.run_select(first, &ctes, explain)?;
        for (select, all) in selects.zip(&query.union_all) {
            let next = self.run_select(select, &ctes, explain)?;
            if next.columns.len() != result.columns.len() {
                return Err(malformed(format!(
                    "UNION branches have {} and {} columns",
                    result.columns.len(),
                    next.columns.len()
                )));
            }
            result.rows.extend(next.rows);
            result.keys.extend(next.keys);
            if !all {
                result.dedup();
            }
        }
        Ok(result)
    }

    /// Rows of a FROM/JOIN source; `region` restricts table sources
    fn load_source(
        &self,
        name: &str,
        qualifier: &str,
        ctes: &Ctes,
        region: Option<(Position, f32)>,
        explain: &mut Explain,
    ) -> MycoResult<Relation> {
        if let Some(cte) = ctes.get(&name.to_ascii_lowercase()) {
            let mut relation = Relation::single(qualifier, None, cte.columns.clone());
            for (values, key) in cte.rows.iter().zip(&cte.keys) {
                relation.push(values.clone(), *key);
            }
            return Ok(relation);
        }

        let table = self.table(name)?;
        explain.add_table(&table.name);
        let indices = match region {
            Some((center, radius)) => self.region_rows(Some(table.id), center, radius),
            None => self.table_rows(table.id),
        };
        let mut relation = Relation::single(qualifier, Some(table.id), table.columns.clone());
        for i in indices {
            relation.push(self.row_values(i, table), self.key_at(i));
        }
        Ok(relation)
    }

    fn run_select(&self, select: &Select, ctes: &Ctes, explain: &mut Explain) -> MycoResult<Output> {
        let region = match select.radius {
            Some(clause) => {
                let center = clause
                    .center
                    .or(self.focus.center)
                    .ok_or_else(|| malformed("RADIUS without AT needs a focus (goto first)"))?;
                Some((center, clause.radius))
            }
            None => self.focus.center.map(|c| (c, self.focus.radius)),
        };
        let is_table = !ctes.contains_key(&select.from.name.to_ascii_lowercase());
        let region = region.filter(|_| is_table);

        let mut relation = self.load_source(&select.from.name, select.from.qualifier(), ctes, region, explain)?;
        explain.candidates += relation.rows.len();
        if let Some((center, radius)) = region {
            explain.focused = true;
            explain.center = Some((center.x, center.y));
            explain.radius = Some(radius);
        }

        for join in &select.joins {
            let right = self.load_source(&join.table.name, join.table.qualifier(), ctes, None, explain)?;
            relation = self.join(relation, join, right)?;
        }

        if let Some(filter) = &select.filter {
            let predicate = bind(filter, &relation)?;
            relation.rows.retain(|t| predicate.passes(&t.values));
        }

        let mut output = if select.is_aggregate() {
            aggregate(select, &relation)?
        } else {
            project(select, &relation)?
        };
        if select.distinct {
            output.dedup();
        }
        output.window(select.offset, select.limit);
        Ok(output)
    }

    // ========================================================================
    // Joins
    // ========================================================================

    fn join(&self, left: Relation, join: &Join, right: Relation) -> MycoResult<Relation> {
        let right_source = right
            .sources
            .first()
            .cloned()
            .ok_or_else(|| malformed("empty join source"))?;
        let mut combined = Relation {
            columns: left.columns.clone(),
            sources: left.sources.clone(),
            rows: Vec::new(),
        };
        combined.extend_schema(&right_source.qualifier, right_source.table, &right.columns);

        let matches: Vec<Vec<usize>> = match (&join.on, join.kind) {
            (None, JoinKind::Cross) => {
                let all: Vec<usize> = (0..right.rows.len()).collect();
                vec![all; left.rows.len()]
            }
            (None, _) => self.fk_matches(&left, &right, right_source.table)?,
            (Some(on), _) => match equi_slots(on, &left, &right) {
                Some((l, r)) => hash_matches(&left, l, &right, r),
                None => {
                    let predicate = bind(on, &combined)?;
                    left.rows
                        .iter()
                        .map(|lt| {
                            (0..right.rows.len())
                                .filter(|&j| {
                                    let mut values = lt.values.clone();
                                    values.extend(right.rows[j].values.iter().cloned());
                                    predicate.passes(&values)
                                })
                                .collect()
                        })
                        .collect()
                }
            },
        };

        let width = right.columns.len();
        for (lt, found) in left.rows.into_iter().zip(matches) {
            if found.is_empty() {
                if join.kind == JoinKind::Left {
                    let mut values = lt.values;
                    values.extend(std::iter::repeat(Value::Null).take(width));
                    let mut keys = lt.keys;
                    keys.push(None);
                    combined.rows.push(Tuple { values, keys });
                }
                continue;
            }
            for j in found {
                let rt = &right.rows[j];
                let mut values = lt.values.clone();
                values.extend(rt.values.iter().cloned());
                let mut keys = lt.keys.clone();
                keys.push(rt.keys.first().copied().flatten());
                combined.rows.push(Tuple { values, keys });
            }
        }
        Ok(combined)
    }

    /// Join through a declared foreign key between any left table and the
    /// right table, in either direction
    fn fk_matches(&self, left: &Relation, right: &Relation, right_table: Option<TableId>) -> MycoResult<Vec<Vec<usize>>> {
        let right_table = right_table.ok_or_else(|| malformed("JOIN without ON needs a table, not a CTE"))?;
        let right_meta = self
            .schema
            .table(right_table)
            .ok_or_else(|| MycoError::UnknownTable(right_table.to_string()))?;

        for (s, source) in left.sources.iter().enumerate() {
            let Some(left_meta) = source.table.and_then(|t| self.schema.table(t)) else {
                continue;
            };

            // child (left) -> parent (right)
            if let Some(fk) = left_meta.foreign_keys.iter().find(|fk| fk.parent == right_table) {
                let slot = (source.offset..source.offset + source.width)
                    .find(|&i| left.columns[i].eq_ignore_ascii_case(&fk.column));
                if let Some(slot) = slot {
                    let mut by_id: HashMap<i64, Vec<usize>> = HashMap::new();
                    for (j, rt) in right.rows.iter().enumerate() {
                        if let Some(Some(key)) = rt.keys.first() {
                            by_id.entry(key.id).or_default().push(j);
                        }
                    }
                    return Ok(left
                        .rows
                        .iter()
                        .map(|lt| {
                            lt.values[slot]
                                .as_i64()
                                .and_then(|id| by_id.get(&id).cloned())
                                .unwrap_or_default()
                        })
                        .collect());
                }
            }

            // parent (left) -> child (right)
            if let Some(fk) = right_meta.foreign_keys.iter().find(|fk| fk.parent == left_meta.id) {
                if let Some(slot) = right.columns.iter().position(|c| c.eq_ignore_ascii_case(&fk.column)) {
                    let mut by_parent: HashMap<i64, Vec<usize>> = HashMap::new();
                    for (j, rt) in right.rows.iter().enumerate() {
                        if let Some(id) = rt.values[slot].as_i64() {
                            by_parent.entry(id).or_default().push(j);
                        }
                    }
                    return Ok(left
                        .rows
                        .iter()
                        .map(|lt| {
                            lt.keys
                                .get(s)
                                .copied()
                                .flatten()
                                .and_then(|k| by_parent.get(&k.id).cloned())
                                .unwrap_or_default()
                        })
                        .collect());
                }
            }
        }
        Err(malformed(format!("no foreign key links {} to the joined tables", right_meta.name)))
    }

    // ========================================================================
    // DML
    // ========================================================================

    fn canonical<'t>(&self, table: &'t Table, column: &str) -> MycoResult<&'t str> {
        table.column(column).ok_or_else(|| MycoError::UnknownColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
    }

    fn insert(&self, insert: &Insert) -> MycoResult<Vec<(PayloadKey, DeltaOp)>> {
        let table = self.table(&insert.table)?;
        let columns: Vec<&str> = insert
            .columns
            .iter()
            .map(|c| self.canonical(table, c))
            .collect::<MycoResult<_>>()?;
        let pk = table.primary_key_column();

        // None once i64::MAX is taken
        let mut next_id = match self
            .table_rows(table.id)
            .into_iter()
            .filter_map(|i| self.key_at(i))
            .map(|k| k.id)
            .max()
        {
            Some(m) => m.checked_add(1),
            None => Some(1),
        };

        let mut ops = Vec::with_capacity(insert.rows.len());
        for row in &insert.rows {
            let mut fields: Vec<Field> = table
                .columns
                .iter()
                .map(|c| Field::new(c.clone(), Value::Null))
                .collect();
            for (column, value) in columns.iter().zip(row) {
                if let Some(field) = fields.iter_mut().find(|f| f.name == *column) {
                    field.value = value.clone();
                }
            }
            let given = pk.and_then(|pk| fields.iter().find(|f| f.name == pk)).and_then(|f| f.value.as_i64());
            let id = match given.or(next_id) {
                Some(id) => id,
                None => {
                    return Err(MycoError::MalformedQuery(format!(
                        "no primary key left to assign in {}",
                        table.name
                    )))
                }
            };
            if let Some(field) = pk.and_then(|pk| fields.iter_mut().find(|f| f.name == pk)) {
                field.value = Value::Integer(id);
            }
            next_id = match (next_id, id.checked_add(1)) {
                (Some(n), Some(after)) => Some(n.max(after)),
                _ => None,
            };
            ops.push((PayloadKey::new(table.id, id), DeltaOp::Upsert(fields)));
        }
        Ok(ops)
    }

    /// Rows of a table matching a WHERE clause, over the whole table
    fn matching_rows(&self, table: &Table, filter: Option<&Expr>) -> MycoResult<Vec<usize>> {
        let indices = self.table_rows(table.id);
        let Some(filter) = filter else {
            return Ok(indices);
        };
        let relation = Relation::single(&table.name, Some(table.id), table.columns.clone());
        let predicate = bind(filter, &relation)?;
        Ok(indices
            .into_iter()
            .filter(|&i| predicate.passes(&self.row_values(i, table)))
            .collect())
    }

    fn update(&self, update: &Update) -> MycoResult<Vec<(PayloadKey, DeltaOp)>> {
        let table = self.table(&update.table)?;
        let pk = table.primary_key_column();
        let mut assignments = Vec::with_capacity(update.assignments.len());
        for (column, value) in &update.assignments {
            let column = self.canonical(table, column)?;
            if pk == Some(column) {
                return Err(malformed(format!("cannot change primary key {}.{}", table.name, column)));
            }
            assignments.push((column, value));
        }

        let mut ops = Vec::new();
        for i in self.matching_rows(table, update.filter.as_ref())? {
            let Some(key) = self.key_at(i) else { continue };
            let mut fields: Vec<Field> = table
                .columns
                .iter()
                .zip(self.row_values(i, table))
                .map(|(c, v)| Field::new(c.clone(), v))
                .collect();
            for (column, value) in &assignments {
                if let Some(field) = fields.iter_mut().find(|f| f.name == *column) {
                    field.value = (*value).clone();
                }
            }
            ops.push((key, DeltaOp::Upsert(fields)));
        }
        Ok(ops)
    }

    fn delete(&self, delete: &Delete) -> MycoResult<Vec<(PayloadKey, DeltaOp)>> {
        let table = self.table(&delete.table)?;
        Ok(self
            .matching_rows(table, delete.filter.as_ref())?
            .into_iter()
            .filter_map(|i| self.key_at(i))
            .map(|key| (key, DeltaOp::Tombstone))
            .collect())
    }
}

// ============================================================================
// Join helpers
// ============================================================================

/// Slots of `a = b` when one side belongs to the left relation and the
/// other to the right
fn equi_slots(on: &Expr, left: &Relation, right: &Relation) -> Option<(usize, usize)> {
    let Expr::Cmp(Operand::Column(a), CmpOp::Eq, Operand::Column(b)) = on else {
        return None;
    };
    if let (Ok(l), Ok(r)) = (left.resolve(a), right.resolve(b)) {
        return Some((l, r));
    }
    if let (Ok(l), Ok(r)) = (left.resolve(b), right.resolve(a)) {
        return Some((l, r));
    }
    None
}

fn hash_matches(left: &Relation, l: usize, right: &Relation, r: usize) -> Vec<Vec<usize>> {
    let mut table: HashMap<String, Vec<usize>> = HashMap::new();
    for (j, rt) in right.rows.iter().enumerate() {
        if let Some(k) = value_key(&rt.values[r]) {
            table.entry(k).or_default().push(j);
        }
    }
    left.rows
        .iter()
        .map(|lt| {
            value_key(&lt.values[l])
                .and_then(|k| table.get(&k).cloned())
                .unwrap_or_default()
        })
        .collect()
}

// ============================================================================
// Projection and aggregation
// ============================================================================

enum SortBy {
    Output(usize),
    Source(usize),
}

fn compare_keys(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    for ((x, y), desc) in a.iter().zip(b).zip(descending) {
        let ord = x.sort_cmp(y);
        let ord = if *desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn output_position(labels: &[String], target: &OrderTarget) -> MycoResult<Option<usize>> {
    Ok(match target {
        OrderTarget::Ordinal(n) => {
            if *n == 0 || *n > labels.len() {
                return Err(malformed(format!("ORDER BY {} is out of range", n)));
            }
            Some(n - 1)
        }
        OrderTarget::Label(label) => labels.iter().position(|l| l.eq_ignore_ascii_case(label)),
        OrderTarget::Column(col) if col.qualifier.is_none() => {
            labels.iter().position(|l| l.eq_ignore_ascii_case(&col.name))
        }
        OrderTarget::Column(_) => None,
    })
}

fn project(select: &Select, relation: &Relation) -> MycoResult<Output> {
    let mut labels = Vec::new();
    let mut slots = Vec::new();
    for item in &select.items {
        match item {
            SelectItem::Wildcard => {
                for (i, c) in relation.columns.iter().enumerate() {
                    labels.push(c.clone());
                    slots.push(i);
                }
            }
            SelectItem::QualifiedWildcard(q) => {
                let source = relation
                    .source(q)
                    .ok_or_else(|| MycoError::UnknownTable(q.clone()))?;
                for i in source.offset..source.offset + source.width {
                    labels.push(relation.columns[i].clone());
                    slots.push(i);
                }
            }
            SelectItem::Column { column, alias } => {
                slots.push(relation.resolve(column)?);
                labels.push(alias.clone().unwrap_or_else(|| column.name.clone()));
            }
            SelectItem::Aggregate { .. } => return Err(malformed("aggregate outside an aggregate query")),
        }
    }

    let mut order = Vec::with_capacity(select.order_by.len());
    for key in &select.order_by {
        let by = match output_position(&labels, &key.target)? {
            Some(i) => SortBy::Output(i),
            None => match &key.target {
                OrderTarget::Column(col) => SortBy::Source(relation.resolve(col)?),
                OrderTarget::Label(label) => return Err(malformed(format!("unknown ORDER BY target {}", label))),
                OrderTarget::Ordinal(n) => return Err(malformed(format!("ORDER BY {} is out of range", n))),
            },
        };
        order.push(by);
    }
    let descending: Vec<bool> = select.order_by.iter().map(|k| k.descending).collect();

    let mut rows: Vec<(Vec<Value>, Option<PayloadKey>, Vec<Value>)> = relation
        .rows
        .iter()
        .map(|t| {
            let out: Vec<Value> = slots.iter().map(|&s| t.values[s].clone()).collect();
            let sort: Vec<Value> = order
                .iter()
                .map(|by| match by {
                    SortBy::Output(i) => out[*i].clone(),
                    SortBy::Source(s) => t.values[*s].clone(),
                })
                .collect();
            (out, t.keys.first().copied().flatten(), sort)
        })
        .collect();
    if !order.is_empty() {
        rows.sort_by(|a, b| compare_keys(&a.2, &b.2, &descending));
    }

    let (rows, keys) = rows.into_iter().map(|(out, key, _)| (out, key)).unzip();
    Ok(Output {
        columns: labels,
        rows,
        keys,
    })
}

fn aggregate(select: &Select, relation: &Relation) -> MycoResult<Output> {
    enum Cell {
        Column(usize),
        Agg(AggFunc, Option<usize>),
    }

    let mut labels = Vec::new();
    let mut cells = Vec::new();
    for item in &select.items {
        match item {
            SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => {
                return Err(malformed("* cannot be combined with aggregates or GROUP BY"))
            }
            SelectItem::Column { column, alias } => {
                cells.push(Cell::Column(relation.resolve(column)?));
                labels.push(alias.clone().unwrap_or_else(|| column.name.clone()));
            }
            SelectItem::Aggregate { func, arg, alias } => {
                let slot = arg.as_ref().map(|c| relation.resolve(c)).transpose()?;
                cells.push(Cell::Agg(*func, slot));
                labels.push(alias.clone().unwrap_or_else(|| aggregate_label(*func, arg.as_ref())));
            }
        }
    }

    let group_slots: Vec<usize> = select
        .group_by
        .iter()
        .map(|c| relation.resolve(c))
        .collect::<MycoResult<_>>()?;
    let mut groups: Vec<Vec<&Tuple>> = Vec::new();
    if group_slots.is_empty() {
        groups.push(relation.rows.iter().collect());
    } else {
        let mut slot_of: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for tuple in &relation.rows {
            let key: Vec<Option<String>> = group_slots.iter().map(|&s| value_key(&tuple.values[s])).collect();
            let g = *slot_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(tuple);
        }
    }

    let mut rows: Vec<Vec<Value>> = groups
        .iter()
        .map(|members| {
            cells
                .iter()
                .map(|cell| match cell {
                    Cell::Column(s) => members.first().map(|t| t.values[*s].clone()).unwrap_or(Value::Null),
                    Cell::Agg(func, slot) => fold(*func, *slot, members),
                })
                .collect()
        })
        .collect();

    if !select.order_by.is_empty() {
        let mut positions = Vec::with_capacity(select.order_by.len());
        for key in &select.order_by {
            let pos = output_position(&labels, &key.target)?
                .ok_or_else(|| malformed("ORDER BY of an aggregate query must name an output column"))?;
            positions.push(pos);
        }
        let descending: Vec<bool> = select.order_by.iter().map(|k| k.descending).collect();
        rows.sort_by(|a, b| {
            let ka: Vec<Value> = positions.iter().map(|&p| a[p].clone()).collect();
            let kb: Vec<Value> = positions.iter().map(|&p| b[p].clone()).collect();
            compare_keys(&ka, &kb, &descending)
        });
    }

    let keys = vec![None; rows.len()];
    Ok(Output {
        columns: labels,
        rows,
        keys,
    })
}

fn fold(func: AggFunc, slot: Option<usize>, members: &[&Tuple]) -> Value {
    let Some(slot) = slot else {
        return Value::Integer(members.len() as i64);
    };
    let values: Vec<&Value> = members
        .iter()
        .map(|t| &t.values[slot])
        .filter(|v| !v.is_null())
        .collect();
    match func {
        AggFunc::Count => Value::Integer(values.len() as i64),
        AggFunc::Sum => {
            if values.is_empty() {
                return Value::Null;
            }
            let integral = values
                .iter()
                .try_fold(0i64, |acc, v| match v {
                    Value::Integer(i) => acc.checked_add(*i),
                    _ => None,
                });
            match integral {
                Some(total) => Value::Integer(total),
                None => Value::Real(values.iter().map(|v| v.as_f64().unwrap_or(0.0)).sum()),
            }
        }
        AggFunc::Avg => {
            if values.is_empty() {
                return Value::Null;
            }
            let total: f64 = values.iter().map(|v| v.as_f64().unwrap_or(0.0)).sum();
            Value::Real(total / values.len() as f64)
        }
        AggFunc::Min => values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggFunc::Max => values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}
