//! # Core
//!
//! Pure domain types. No I/O, no randomness, no engine state.
//!
//! - `Position` - a point in the 2-D coordinate space
//! - `TableId` / `PayloadKey` - identities
//! - `Value` - a typed field value
//! - `Payload` - a stored record
//! - `Schema` / `Table` - table metadata
//! - `MycoConfig` - engine configuration
//! - `MycoError` - the error taxonomy

pub mod config;
pub mod error;
pub mod payload;
pub mod schema;
pub mod value;

pub use error::{MycoError, MycoResult};
pub use payload::{Field, ForeignKey, Payload};
pub use schema::{ForeignKeyDecl, Schema, Table};
pub use value::Value;

use std::fmt;

/// Index of a table in the schema (dense, assigned in creation order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl TableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Engine-wide identity of a payload: the owning table plus its primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadKey {
    pub table: TableId,
    pub id: i64,
}

impl PayloadKey {
    pub fn new(table: TableId, id: i64) -> Self {
        Self { table, id }
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

/// A point in the coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Clamp into `[0, width) x [0, height)`
    pub fn clamped(self, width: usize, height: usize) -> Self {
        let max_x = (width.max(1) as f32) - 0.001;
        let max_y = (height.max(1) as f32) - 0.001;
        Self {
            x: self.x.clamp(0.0, max_x),
            y: self.y.clamp(0.0, max_y),
        }
    }

    /// Grid cell containing this point
    pub fn cell(&self, width: usize, height: usize) -> (usize, usize) {
        let cx = (self.x.max(0.0) as usize).min(width.saturating_sub(1));
        let cy = (self.y.max(0.0) as usize).min(height.saturating_sub(1));
        (cx, cy)
    }
}

/// Query scope: an optional center plus the search radius.
///
/// Set by `goto`, cleared by `unfocus`; the radius survives unfocus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusState {
    pub center: Option<Position>,
    pub radius: f32,
}

impl FocusState {
    pub fn new(radius: f32) -> Self {
        Self { center: None, radius }
    }

    pub fn is_set(&self) -> bool {
        self.center.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_position_clamped_and_cell() {
        let p = Position::new(-3.0, 99.5).clamped(10, 10);
        assert_eq!(p.x, 0.0);
        assert!(p.y < 10.0);
        assert_eq!(p.cell(10, 10), (0, 9));
    }

    #[test]
    fn test_focus_state() {
        let mut focus = FocusState::new(5.0);
        assert!(!focus.is_set());
        focus.center = Some(Position::new(1.0, 1.0));
        assert!(focus.is_set());
    }
}
