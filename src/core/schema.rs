//! # Schema
//!
//! Table metadata: names, ordered columns and declared foreign keys.
//! Table names are matched case-insensitively.

use std::collections::HashMap;

use super::TableId;

/// A declared foreign-key column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDecl {
    pub column: String,
    pub parent: TableId,
}

/// One table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDecl>,
}

impl Table {
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Canonical spelling of a column, if it exists
    pub fn column(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(column))
            .map(String::as_str)
    }

    /// The primary-key column: `id`, `<table>id` or `<table>_id`
    pub fn primary_key_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| is_primary_key_name(&self.name, c))
            .map(String::as_str)
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyDecl> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.column.eq_ignore_ascii_case(column))
    }

    /// Record a foreign-key declaration once
    pub fn declare_foreign_key(&mut self, column: &str, parent: TableId) {
        if self.foreign_key(column).is_none() {
            self.foreign_keys.push(ForeignKeyDecl {
                column: column.to_string(),
                parent,
            });
        }
    }
}

/// True if `column` names the primary key of `table`
pub fn is_primary_key_name(table: &str, column: &str) -> bool {
    let col = column.to_ascii_lowercase();
    let table = table.to_ascii_lowercase();
    col == "id" || col == format!("{}id", table) || col == format!("{}_id", table)
}

/// All tables known to an engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    tables: Vec<Table>,
    lookup: HashMap<String, TableId>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, or return the existing one with the same name
    pub fn add_table(&mut self, name: &str) -> TableId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = TableId(self.tables.len() as u32);
        self.tables.push(Table::new(id, name));
        self.lookup.insert(key, id);
        id
    }

    /// Insert a fully formed table (image load); ids must be dense
    pub(crate) fn push_table(&mut self, table: Table) {
        self.lookup.insert(table.name.to_ascii_lowercase(), table.id);
        self.tables.push(table);
    }

    pub fn find(&self, name: &str) -> Option<TableId> {
        self.lookup.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index())
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index())
    }

    pub fn by_name(&self, name: &str) -> Option<&Table> {
        self.find(name).and_then(|id| self.table(id))
    }

    pub fn name(&self, id: TableId) -> Option<&str> {
        self.table(id).map(|t| t.name.as_str())
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_table_is_idempotent_and_case_insensitive() {
        let mut schema = Schema::new();
        let a = schema.add_table("Artist");
        let b = schema.add_table("ARTIST");
        assert_eq!(a, b);
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.find("artist"), Some(a));
        assert_eq!(schema.name(a), Some("Artist"));
    }

    #[test]
    fn test_primary_key_detection() {
        let mut table = Table::new(TableId(0), "Album");
        table.columns = vec!["AlbumId".into(), "Title".into(), "ArtistId".into()];
        assert_eq!(table.primary_key_column(), Some("AlbumId"));

        table.columns = vec!["id".into(), "ArtistId".into()];
        assert_eq!(table.primary_key_column(), Some("id"));

        table.columns = vec!["Title".into()];
        assert_eq!(table.primary_key_column(), None);
    }

    #[test]
    fn test_declare_foreign_key_once() {
        let mut table = Table::new(TableId(1), "Album");
        table.declare_foreign_key("ArtistId", TableId(0));
        table.declare_foreign_key("artistid", TableId(0));
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_key("ARTISTID").map(|fk| fk.parent), Some(TableId(0)));
    }
}
