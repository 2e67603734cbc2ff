//! # Swarm
//!
//! Ingestion by simulation ("swarm-sort").
//!
//! - `field` - decaying scalar grids shared by all agents
//! - `agent` - carriers, species profiles and genomes
//! - `ingest` - the run loop, reports and cancellation
//!
//! The swarm only reads and moves payloads. Foreign-key columns must be
//! linked (see `adapters::rules`) before a run.

pub mod agent;
pub mod field;
pub mod ingest;

pub use agent::{Agent, Genome, Species, SpeciesProfile};
pub use field::{FieldKind, FieldSet, GridField};
pub use ingest::{CancelToken, ClusterHint, DanglingRef, IngestReport, IngestScope, Swarm};
