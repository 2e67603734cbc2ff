//! # Query
//!
//! - `sql` - SQL-light tokenizer, parser and AST
//! - `eval` - relations, column binding, three-valued predicates
//! - `engine` - candidate selection, lookups, SELECT execution, DML
//! - `result` - `ResultSet` / `Explain`

pub mod engine;
pub(crate) mod eval;
pub mod result;
pub mod sql;

pub use engine::{Outcome, QueryContext};
pub use result::{Explain, ResultSet};
pub use sql::{parse, Statement};
