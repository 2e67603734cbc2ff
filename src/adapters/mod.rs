//! # Adapters
//!
//! Swappable implementations of port traits, plus the edges of the system.
//!
//! - Storage adapters: in-memory payload store
//! - Index adapters: uniform bucket grid
//! - Formats: binary image, SQL dump loader, ingest rules file
//! - Bindings: C ABI, Python (when enabled)
//!
//! Each storage/index adapter implements one port trait and can be swapped
//! without changing the engine.

pub mod storage;
pub mod index;
pub mod image;
pub mod sql_dump;
pub mod rules;
pub mod ffi;

#[cfg(feature = "python")]
pub mod python;
