//! # Payload
//!
//! A stored record as a physical point: identity, owning table, position,
//! ordered field values and foreign-key references to parent payloads.

use super::{PayloadKey, Position, TableId, Value};

/// One named field value
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A reference from a payload to its parent payload
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Column holding the reference
    pub column: String,

    /// Table the reference points into
    pub parent_table: TableId,

    /// Parent primary key; `None` for NULL references
    pub parent_id: Option<i64>,

    /// Set once the swarm deposited this payload next to its parent
    pub settled: bool,
}

impl ForeignKey {
    pub fn new(column: impl Into<String>, parent_table: TableId, parent_id: Option<i64>) -> Self {
        Self {
            column: column.into(),
            parent_table,
            parent_id,
            settled: false,
        }
    }

    /// Key of the referenced parent, if the reference is not NULL
    pub fn parent_key(&self) -> Option<PayloadKey> {
        self.parent_id.map(|id| PayloadKey::new(self.parent_table, id))
    }
}

/// A record living at a point in the coordinate space
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Primary key within the owning table
    pub id: i64,

    /// Owning table
    pub table: TableId,

    /// Position; `None` until the swarm (or a load) places it
    pub position: Option<Position>,

    /// Field values in column order
    pub fields: Vec<Field>,

    /// Outgoing references
    pub foreign_keys: Vec<ForeignKey>,

    /// Some reference could not be resolved at the last ingest
    pub dangling: bool,
}

impl Payload {
    pub fn new(table: TableId, id: i64, fields: Vec<Field>) -> Self {
        Self {
            id,
            table,
            position: None,
            fields,
            foreign_keys: Vec::new(),
            dangling: false,
        }
    }

    pub fn key(&self) -> PayloadKey {
        PayloadKey::new(self.table, self.id)
    }

    pub fn is_placed(&self) -> bool {
        self.position.is_some()
    }

    /// Field value by case-insensitive column name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| &f.value)
    }

    /// Overwrite (or append) a field value
    pub fn set_field(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name)) {
            Some(field) => field.value = value,
            None => self.fields.push(Field::new(name, value)),
        }
    }

    /// `name=value, name=value` rendering used by the ABI raw accessor
    pub fn raw_text(&self) -> String {
        render_fields(&self.fields)
    }
}

/// Render fields as `name=value` pairs
pub fn render_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| format!("{}={}", f.name, f.value))
        .collect::<Vec<_>>()
        .join(", ")
}
