//! # Index Adapters
//!
//! Implementations of the `SpatialLookup` port.
//!
//! - `GridIndex` - uniform bucket grid sized relative to the query radius

mod grid;

pub use grid::GridIndex;
