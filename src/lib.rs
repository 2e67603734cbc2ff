//! # MycoDB - a database laid out by a foraging swarm
//!
//! > "Related rows end up next to each other"
//!
//! MycoDB ingests relational tables and lets a swarm of agents carry every
//! row across a 2D grid until it sits next to the rows it references.
//! Queries can then be restricted to a small region around a focus point
//! instead of scanning whole tables.
//!
//! ## Philosophy
//!
//! - **Position carries relationship** - A child settles within reach of its parent
//! - **Focus before filter** - The region is the candidate set; predicates run on it
//! - **Changes are staged** - Writes land in a delta log and merge on demand
//! - **Pure core, swappable adapters** - Hexagonal architecture
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MYCODB                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  CORE (pure data, no I/O)                                   │
//! │    Payload, Value, Schema, Position, MycoConfig, MycoError  │
//! │                                                              │
//! │  PORTS (trait contracts)                                     │
//! │    PayloadStore, SpatialLookup                              │
//! │                                                              │
//! │  ADAPTERS (swappable implementations)                       │
//! │    Storage: Memory      Index: Grid                         │
//! │    Formats: image, SQL dump, rules                          │
//! │    API: C ABI, Python bindings                              │
//! │                                                              │
//! │  SWARM (fields, agents, ingestion)                          │
//! │  QUERY (lookups, SQL-light, results)                        │
//! │  DELTA (pending changes, combined view)                     │
//! │                                                              │
//! │  ENGINE (orchestration)                                      │
//! │    MycoDb - the main entry point                            │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mycodb::{MycoConfig, MycoDb, Outcome};
//! use std::path::Path;
//!
//! let mut db = MycoDb::with_config(MycoConfig::new(64, 64))?;
//! db.ingest_sql(Path::new("chinook.sql"), None)?;
//!
//! // Focus on artist 5 and read its albums from the neighbourhood only
//! db.goto(5, Some("Artist"))?;
//! db.set_radius(6.0);
//! if let Outcome::Rows(rows) = db.sql("SELECT Title FROM Album")? {
//!     println!("{}", rows.explain);
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Core domain - pure data, no I/O
/// Contains: Payload, Value, Schema, Position, config, errors
pub mod core;

/// Port definitions - trait contracts for adapters
/// Contains: PayloadStore trait, SpatialLookup trait
pub mod ports;

/// Adapter implementations - swappable components
/// Contains: storage, index, image, sql_dump, rules, ffi, python submodules
pub mod adapters;

/// Swarm - field grids, agents and the ingestion loop
pub mod swarm;

/// Query - focused lookups and the SQL-light engine
pub mod query;

/// Delta - pending changes and the combined view
pub mod delta;

/// Engine - orchestration layer
/// Contains: MycoDb main struct
pub mod engine;

// ============================================================================
// PYTHON BINDINGS (when enabled)
// ============================================================================

#[cfg(feature = "python")]
pub use adapters::python::*;

// ============================================================================
// RE-EXPORTS (public API)
// ============================================================================

// Core types
pub use crate::core::config::{FieldConfig, IngestConfig, MycoConfig};
pub use crate::core::{
    Field, FocusState, ForeignKey, MycoError, MycoResult, Payload, PayloadKey, Position, Schema, Table, TableId,
    Value,
};

// Port traits
pub use crate::ports::{PayloadStore, SpatialLookup};

// Adapters
pub use crate::adapters::index::GridIndex;
pub use crate::adapters::rules::IngestRules;
pub use crate::adapters::sql_dump::Dataset;
pub use crate::adapters::storage::MemoryStore;

// Swarm, query, delta
pub use crate::delta::{DeltaOp, DeltaRecord, DeltaStore, MergeReport};
pub use crate::query::{Explain, Outcome, ResultSet};
pub use crate::swarm::{CancelToken, IngestReport, IngestScope};

// Engine
pub use crate::engine::{DbStats, MycoDb, TableDescription};
