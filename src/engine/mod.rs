//! # Engine
//!
//! The orchestration layer that wires everything together.
//!
//! This is where:
//! - Configuration is applied
//! - Adapters are connected to ports
//! - Ingestion, queries and the delta store meet behind one handle

mod db;
mod inspect;

pub use db::MycoDb;
pub use inspect::{DbStats, TableDescription, TableStats};
