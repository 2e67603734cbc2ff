//! # Inspection
//!
//! Read-only summaries behind `tables`, `stats`, `schema` and `describe`.

use std::fmt;

use crate::core::{Payload, Position, Table};

/// Per-table counts
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub name: String,
    /// Rows in the base store
    pub rows: usize,
    /// Rows with a position
    pub placed: usize,
    /// Rows flagged with an unresolved reference
    pub dangling: usize,
}

/// Whole-database counts
#[derive(Debug, Clone, PartialEq)]
pub struct DbStats {
    pub tables: Vec<TableStats>,
    pub payloads: usize,
    /// Delta records waiting for merge
    pub pending: usize,
    pub dangling: usize,
    pub width: usize,
    pub height: usize,
}

impl fmt::Display for DbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} payloads in {} tables on a {}x{} grid ({} pending, {} dangling)",
            self.payloads,
            self.tables.len(),
            self.width,
            self.height,
            self.pending,
            self.dangling
        )?;
        for t in &self.tables {
            writeln!(f, "  {:<24} {:>8} rows {:>8} placed {:>6} dangling", t.name, t.rows, t.placed, t.dangling)?;
        }
        Ok(())
    }
}

/// Schema plus the spatial footprint of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub table: Table,
    /// Parent table name per declared foreign key, aligned with `table.foreign_keys`
    pub parents: Vec<String>,
    pub rows: usize,
    pub placed: usize,
    /// Mean position of the placed rows
    pub centroid: Option<Position>,
    /// (min corner, max corner) of the placed rows
    pub bounds: Option<(Position, Position)>,
}

impl TableDescription {
    pub(crate) fn new<'a>(table: &Table, parents: Vec<String>, payloads: impl Iterator<Item = &'a Payload>) -> Self {
        let mut rows = 0;
        let mut placed = 0;
        let (mut sx, mut sy) = (0.0f64, 0.0f64);
        let mut bounds: Option<(Position, Position)> = None;
        for p in payloads {
            rows += 1;
            let Some(pos) = p.position else { continue };
            placed += 1;
            sx += pos.x as f64;
            sy += pos.y as f64;
            bounds = Some(match bounds {
                None => (pos, pos),
                Some((lo, hi)) => (
                    Position::new(lo.x.min(pos.x), lo.y.min(pos.y)),
                    Position::new(hi.x.max(pos.x), hi.y.max(pos.y)),
                ),
            });
        }
        let centroid = (placed > 0).then(|| Position::new((sx / placed as f64) as f32, (sy / placed as f64) as f32));
        Self {
            table: table.clone(),
            parents,
            rows,
            placed,
            centroid,
            bounds,
        }
    }
}

impl fmt::Display for TableDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} rows, {} placed)", self.table.name, self.rows, self.placed)?;
        for column in &self.table.columns {
            match self
                .table
                .foreign_keys
                .iter()
                .zip(&self.parents)
                .find(|(fk, _)| fk.column.eq_ignore_ascii_case(column))
            {
                Some((_, parent)) => writeln!(f, "  {} -> {}", column, parent)?,
                None => writeln!(f, "  {}", column)?,
            }
        }
        if let (Some(c), Some((lo, hi))) = (self.centroid, self.bounds) {
            writeln!(
                f,
                "  centroid ({:.2}, {:.2}) bounds ({:.2}, {:.2})-({:.2}, {:.2})",
                c.x, c.y, lo.x, lo.y, hi.x, hi.y
            )?;
        }
        Ok(())
    }
}
