//! # SQL Dump Loader
//!
//! Reads plain SQL dumps: `CREATE TABLE` for column lists and `INSERT INTO`
//! for rows. Everything else in the dump is skipped.
//!
//! Handles `--` and `/* */` comments, backtick / double-quote / bracket
//! identifiers, doubled-quote and backslash escapes in strings, and
//! schema-qualified names (`main.Artist` -> `Artist`).

use std::path::Path;

use tracing::{debug, info};

use crate::core::schema::is_primary_key_name;
use crate::core::{Field, MycoError, MycoResult, Payload, Schema, Value};
use crate::ports::PayloadStore;

/// Table definitions that open with these words declare no column
const CONSTRAINT_WORDS: [&str; 8] = [
    "PRIMARY", "FOREIGN", "UNIQUE", "CONSTRAINT", "KEY", "INDEX", "CHECK", "FULLTEXT",
];

/// One table of a dump
#[derive(Debug, Clone, PartialEq)]
pub struct DumpTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DumpTable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn column_index(&mut self, column: &str) -> usize {
        match self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)) {
            Some(i) => i,
            None => {
                self.columns.push(column.to_string());
                self.columns.len() - 1
            }
        }
    }
}

/// Every table of a dump in first-mention order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub tables: Vec<DumpTable>,
}

impl Dataset {
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn table(&self, name: &str) -> Option<&DumpTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn table_entry(&mut self, name: &str) -> &mut DumpTable {
        let idx = match self.tables.iter().position(|t| t.name.eq_ignore_ascii_case(name)) {
            Some(i) => i,
            None => {
                self.tables.push(DumpTable::new(name));
                self.tables.len() - 1
            }
        };
        &mut self.tables[idx]
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare word: keyword, identifier or number
    Word(String),
    /// Quoted identifier
    Ident(String),
    /// String literal
    Str(String),
    Sym(char),
}

impl Tok {
    fn is_word(&self, word: &str) -> bool {
        matches!(self, Tok::Word(w) if w.eq_ignore_ascii_case(word))
    }

    fn name(&self) -> Option<&str> {
        match self {
            Tok::Word(w) | Tok::Ident(w) => Some(w),
            _ => None,
        }
    }
}

fn lex(text: &str) -> MycoResult<Vec<Tok>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '\'' {
            let (s, next) = read_quoted(&chars, i, '\'', true)?;
            out.push(Tok::Str(s));
            i = next;
        } else if c == '"' || c == '`' {
            let (s, next) = read_quoted(&chars, i, c, false)?;
            out.push(Tok::Ident(s));
            i = next;
        } else if c == '[' {
            let (s, next) = read_quoted(&chars, i, ']', false)?;
            out.push(Tok::Ident(s));
            i = next;
        } else if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '$')) {
                i += 1;
            }
            out.push(Tok::Word(chars[start..i].iter().collect()));
        } else {
            out.push(Tok::Sym(c));
            i += 1;
        }
    }
    Ok(out)
}

/// Read a quoted run starting at `start`; the closing quote may be doubled
/// to escape it.
fn read_quoted(chars: &[char], start: usize, close: char, backslash: bool) -> MycoResult<(String, usize)> {
    let mut s = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash && c == '\\' && i + 1 < chars.len() {
            s.push(match chars[i + 1] {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            i += 2;
        } else if c == close {
            if chars.get(i + 1) == Some(&close) {
                s.push(close);
                i += 2;
            } else {
                return Ok((s, i + 1));
            }
        } else {
            s.push(c);
            i += 1;
        }
    }
    Err(MycoError::LoadFailure(format!("unterminated quote starting at offset {}", start)))
}

// ============================================================================
// Statements
// ============================================================================

/// Parse a dump held in memory
pub fn parse_sql_dump(text: &str) -> MycoResult<Dataset> {
    let tokens = lex(text)?;
    let mut dataset = Dataset::default();
    let mut skipped = 0usize;
    for stmt in tokens.split(|t| *t == Tok::Sym(';')) {
        if stmt.is_empty() {
            continue;
        }
        if stmt.len() > 2 && stmt[0].is_word("CREATE") && stmt[1].is_word("TABLE") {
            parse_create(&stmt[2..], &mut dataset)?;
        } else if let Some(at) = insert_target(stmt) {
            parse_insert(&stmt[at..], &mut dataset)?;
        } else {
            skipped += 1;
        }
    }
    if dataset.row_count() == 0 {
        return Err(MycoError::LoadFailure("dump contains no rows".into()));
    }
    debug!(tables = dataset.tables.len(), rows = dataset.row_count(), skipped, "Parsed SQL dump");
    Ok(dataset)
}

/// Start of the table name in `INSERT [OR REPLACE | IGNORE] INTO name`
fn insert_target(stmt: &[Tok]) -> Option<usize> {
    if !stmt.first()?.is_word("INSERT") {
        return None;
    }
    stmt.iter().take(4).position(|t| t.is_word("INTO")).map(|i| i + 1)
}

/// Parse a dump file
pub fn load_sql_dump(path: &Path) -> MycoResult<Dataset> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MycoError::LoadFailure(format!("{}: {}", path.display(), e)))?;
    parse_sql_dump(&text)
}

/// `[schema.]name`, returning the last segment and the rest of the tokens
fn qualified_name(tokens: &[Tok]) -> MycoResult<(String, &[Tok])> {
    let mut rest = tokens;
    let mut name = None;
    while let Some(part) = rest.first().and_then(Tok::name) {
        if let Some(last) = part.rsplit('.').next().filter(|s| !s.is_empty()) {
            name = Some(last.to_string());
        }
        rest = &rest[1..];
        if part.ends_with('.') {
            continue;
        }
        if rest.first() == Some(&Tok::Sym('.')) {
            rest = &rest[1..];
        } else {
            break;
        }
    }
    match name {
        Some(n) => Ok((n, rest)),
        None => Err(MycoError::LoadFailure("missing table name".into())),
    }
}

/// Split the contents of a parenthesised group on top-level commas.
/// `tokens[0]` must be `(`; returns the items and the tokens after `)`.
fn paren_items(tokens: &[Tok]) -> MycoResult<(Vec<&[Tok]>, &[Tok])> {
    if tokens.first() != Some(&Tok::Sym('(')) {
        return Err(MycoError::LoadFailure("expected '('".into()));
    }
    let mut depth = 0usize;
    let mut items = Vec::new();
    let mut start = 1;
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Tok::Sym('(') => depth += 1,
            Tok::Sym(')') => {
                depth -= 1;
                if depth == 0 {
                    if i > start {
                        items.push(&tokens[start..i]);
                    }
                    return Ok((items, &tokens[i + 1..]));
                }
            }
            Tok::Sym(',') if depth == 1 => {
                items.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    Err(MycoError::LoadFailure("unbalanced parentheses".into()))
}

fn parse_create(tokens: &[Tok], dataset: &mut Dataset) -> MycoResult<()> {
    let mut rest = tokens;
    if rest.len() > 3 && rest[0].is_word("IF") && rest[1].is_word("NOT") && rest[2].is_word("EXISTS") {
        rest = &rest[3..];
    }
    let (name, rest) = qualified_name(rest)?;
    let (defs, _) = paren_items(rest)?;
    let table = dataset.table_entry(&name);
    for def in defs {
        let Some(first) = def.first() else { continue };
        if let Tok::Word(w) = first {
            if CONSTRAINT_WORDS.iter().any(|k| w.eq_ignore_ascii_case(k)) {
                continue;
            }
        }
        if let Some(column) = first.name() {
            table.column_index(column);
        }
    }
    Ok(())
}

fn parse_insert(tokens: &[Tok], dataset: &mut Dataset) -> MycoResult<()> {
    let (name, mut rest) = qualified_name(tokens)?;
    let mut columns: Option<Vec<String>> = None;
    if rest.first() == Some(&Tok::Sym('(')) {
        let (items, after) = paren_items(rest)?;
        columns = Some(
            items
                .iter()
                .filter_map(|item| item.first().and_then(Tok::name).map(str::to_string))
                .collect(),
        );
        rest = after;
    }
    if !rest.first().map_or(false, |t| t.is_word("VALUES")) {
        return Err(MycoError::LoadFailure(format!("INSERT INTO {} without VALUES", name)));
    }
    rest = &rest[1..];

    let table = dataset.table_entry(&name);
    while rest.first() == Some(&Tok::Sym('(')) {
        let (items, after) = paren_items(rest)?;
        let values: Vec<Value> = items.iter().map(|item| literal(item)).collect();

        let slots: Vec<usize> = match &columns {
            Some(cols) => cols.iter().map(|c| table.column_index(c)).collect(),
            None => (0..values.len())
                .map(|i| match table.columns.get(i) {
                    Some(_) => i,
                    None => table.column_index(&format!("col{}", i + 1)),
                })
                .collect(),
        };
        let mut row = vec![Value::Null; table.columns.len()];
        for (slot, value) in slots.into_iter().zip(values) {
            row[slot] = value;
        }
        table.rows.push(row);

        rest = after;
        if rest.first() == Some(&Tok::Sym(',')) {
            rest = &rest[1..];
        }
    }
    Ok(())
}

/// Value of one VALUES item
fn literal(tokens: &[Tok]) -> Value {
    match tokens {
        [Tok::Str(s)] => Value::Text(s.clone()),
        [Tok::Word(w)] => Value::from_literal(w),
        [Tok::Sym('-'), Tok::Word(w)] => Value::from_literal(&format!("-{}", w)),
        [Tok::Sym('+'), Tok::Word(w)] => Value::from_literal(w),
        _ => {
            let raw: Vec<String> = tokens
                .iter()
                .map(|t| match t {
                    Tok::Word(w) | Tok::Ident(w) | Tok::Str(w) => w.clone(),
                    Tok::Sym(c) => c.to_string(),
                })
                .collect();
            Value::from_literal(&raw.join(""))
        }
    }
}

// ============================================================================
// Population
// ============================================================================

/// Create tables and payloads for a parsed dump. Returns rows inserted.
///
/// The row id is the primary-key column (`id`, `<table>id`, `<table>_id`),
/// else an integer first column, else the row's 1-based ordinal.
pub fn populate(dataset: &Dataset, schema: &mut Schema, store: &mut dyn PayloadStore) -> usize {
    let mut inserted = 0;
    for dump in &dataset.tables {
        let table_id = schema.add_table(&dump.name);
        if let Some(table) = schema.table_mut(table_id) {
            for column in &dump.columns {
                if !table.has_column(column) {
                    table.columns.push(column.clone());
                }
            }
        }
        let pk = dump.columns.iter().position(|c| is_primary_key_name(&dump.name, c));

        for (ordinal, row) in dump.rows.iter().enumerate() {
            let id = pk
                .and_then(|i| row.get(i))
                .and_then(Value::as_i64)
                .or_else(|| match row.first() {
                    Some(Value::Integer(i)) => Some(*i),
                    _ => None,
                })
                .unwrap_or(ordinal as i64 + 1);
            let fields = dump
                .columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| Field::new(c.clone(), v.clone()))
                .collect();
            store.insert(Payload::new(table_id, id, fields));
            inserted += 1;
        }
    }
    info!(tables = dataset.tables.len(), rows = inserted, "Populated store from dump");
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;
    use crate::core::{PayloadKey, TableId};

    const CHINOOK: &str = r#"
        -- Chinook excerpt
        CREATE TABLE IF NOT EXISTS [Artist] (
            [ArtistId] INTEGER NOT NULL,
            [Name] NVARCHAR(120),
            CONSTRAINT [PK_Artist] PRIMARY KEY ([ArtistId])
        );
        CREATE TABLE `Album` (
            `AlbumId` INTEGER NOT NULL, /* key */
            `Title` NVARCHAR(160) NOT NULL,
            `ArtistId` INTEGER NOT NULL,
            FOREIGN KEY (`ArtistId`) REFERENCES `Artist` (`ArtistId`)
        );
        INSERT INTO [Artist] ([ArtistId], [Name]) VALUES (1, 'AC/DC'), (2, 'Accept');
        INSERT INTO main."Album" VALUES (1, 'For Those About To Rock; We Salute You', 1);
        INSERT INTO Album VALUES (2, 'Balls to the Wall', 2), (3, 'Restless and Wild', 2);
        PRAGMA foreign_keys = ON;
    "#;

    #[test]
    fn test_parse_create_and_insert() {
        let dataset = parse_sql_dump(CHINOOK).unwrap();
        assert_eq!(dataset.tables.len(), 2);
        assert_eq!(dataset.row_count(), 5);

        let artist = dataset.table("artist").unwrap();
        assert_eq!(artist.columns, vec!["ArtistId", "Name"]);
        assert_eq!(artist.rows[0], vec![Value::Integer(1), Value::from("AC/DC")]);

        let album = dataset.table("Album").unwrap();
        assert_eq!(album.columns, vec!["AlbumId", "Title", "ArtistId"]);
        // Semicolon inside a string does not end the statement
        assert_eq!(album.rows[0][1], Value::from("For Those About To Rock; We Salute You"));
    }

    #[test]
    fn test_quote_escapes_and_negatives() {
        let dataset = parse_sql_dump(
            "INSERT INTO t (a, b, c, d) VALUES ('it''s', 'back\\'slash', -4.5, NULL);",
        )
        .unwrap();
        let row = &dataset.table("t").unwrap().rows[0];
        assert_eq!(row[0], Value::from("it's"));
        assert_eq!(row[1], Value::from("back'slash"));
        assert_eq!(row[2], Value::Real(-4.5));
        assert_eq!(row[3], Value::Null);
    }

    #[test]
    fn test_extra_values_get_generated_columns() {
        let dataset = parse_sql_dump(
            "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1, 'x');",
        )
        .unwrap();
        let t = dataset.table("t").unwrap();
        assert_eq!(t.columns, vec!["id", "col2"]);
        assert_eq!(t.rows[0], vec![Value::Integer(1), Value::from("x")]);
    }

    #[test]
    fn test_column_list_reorders_into_declared_layout() {
        let dataset = parse_sql_dump(
            "CREATE TABLE t (a, b, c); INSERT INTO t (c, a) VALUES (3, 1);",
        )
        .unwrap();
        let t = dataset.table("t").unwrap();
        assert_eq!(t.rows[0], vec![Value::Integer(1), Value::Null, Value::Integer(3)]);
    }

    #[test]
    fn test_empty_or_broken_dump_fails() {
        assert!(matches!(parse_sql_dump("CREATE TABLE t (a);"), Err(MycoError::LoadFailure(_))));
        assert!(matches!(parse_sql_dump("INSERT INTO t VALUES ('open"), Err(MycoError::LoadFailure(_))));
        assert!(matches!(parse_sql_dump("INSERT INTO t VALUES (1"), Err(MycoError::LoadFailure(_))));
    }

    #[test]
    fn test_populate_detects_row_ids() {
        let dataset = parse_sql_dump(
            "INSERT INTO Genre (Name, GenreId) VALUES ('Rock', 7);
             INSERT INTO Note (n, text) VALUES (42, 'hi');
             INSERT INTO Tag (label) VALUES ('a'), ('b');",
        )
        .unwrap();
        let mut schema = Schema::new();
        let mut store = MemoryStore::new();
        assert_eq!(populate(&dataset, &mut schema, &mut store), 4);

        let genre = schema.find("Genre").unwrap();
        assert!(store.get(PayloadKey::new(genre, 7)).is_some());
        let note = schema.find("Note").unwrap();
        assert!(store.get(PayloadKey::new(note, 42)).is_some());
        let tag = schema.find("tag").unwrap();
        assert_eq!(tag, TableId(2));
        assert!(store.get(PayloadKey::new(tag, 1)).is_some());
        assert!(store.get(PayloadKey::new(tag, 2)).is_some());
        assert_eq!(schema.table(genre).unwrap().columns, vec!["Name", "GenreId"]);
    }
}
