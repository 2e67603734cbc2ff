//! # Storage Adapters
//!
//! Implementations of the `PayloadStore` port.
//!
//! Available adapters:
//! - `MemoryStore` - insertion-ordered Vec + key map (embedded, volatile)
//!
//! Durability comes from the image codec (`adapters::image`), not from the
//! store itself.

mod memory;

pub use memory::MemoryStore;
