//! # Query Results
//!
//! `ResultSet` plus the `Explain` metadata every query produces, with CSV
//! and JSON export.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Number};

use crate::core::{PayloadKey, Position, Value};

/// How the candidate set of a query was produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explain {
    /// Candidate set restricted to a region
    pub focused: bool,

    /// Region center, when focused
    pub center: Option<(f32, f32)>,

    /// Region radius, when focused
    pub radius: Option<f32>,

    /// Candidate-set size before filtering
    pub candidates: usize,

    /// Rows that passed the predicate (before any limit)
    pub matches: usize,

    /// Tables the query read
    pub tables: Vec<String>,

    /// `primary-key`, `fk-local`, `fk-global-fallback`, `region-scan`,
    /// `table-scan`, `global-scan`
    pub strategy: &'static str,
}

impl Explain {
    pub(crate) fn new(strategy: &'static str) -> Self {
        Self {
            focused: false,
            center: None,
            radius: None,
            candidates: 0,
            matches: 0,
            tables: Vec::new(),
            strategy,
        }
    }

    pub(crate) fn focus(mut self, center: Position, radius: f32) -> Self {
        self.focused = true;
        self.center = Some((center.x, center.y));
        self.radius = Some(radius);
        self
    }

    pub(crate) fn add_table(&mut self, name: &str) {
        if !self.tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            self.tables.push(name.to_string());
        }
    }
}

impl fmt::Display for Explain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy={} ", self.strategy)?;
        match (self.center, self.radius) {
            (Some((x, y)), Some(r)) => write!(f, "focus=({:.2}, {:.2}) radius={} ", x, y, r)?,
            _ => write!(f, "focus=none ")?,
        }
        write!(
            f,
            "candidates={} matches={} tables=[{}]",
            self.candidates,
            self.matches,
            self.tables.join(", ")
        )
    }
}

/// Rows returned by a query
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,

    /// Source payload of each row; `None` for aggregates and CTE-only rows
    pub keys: Vec<Option<PayloadKey>>,

    pub explain: Explain,
}

impl ResultSet {
    pub fn empty(explain: Explain) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            keys: Vec::new(),
            explain,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of a named column in one row
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// RFC 4180-style CSV with a header line. NULL is an empty cell.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_line(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|v| if v.is_null() { String::new() } else { v.to_string() })
                .collect();
            push_csv_line(&mut out, cells.iter().map(String::as_str));
        }
        out
    }

    /// Array of objects keyed by column name
    pub fn to_json(&self) -> String {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for (name, value) in self.columns.iter().zip(row) {
                    object.insert(name.clone(), json_value(value));
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(rows).to_string()
    }
}

fn push_csv_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells
        .map(|cell| {
            if cell.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.to_string()
            }
        })
        .collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet {
            columns: vec!["AlbumId".into(), "Title".into(), "Score".into()],
            rows: vec![
                vec![Value::Integer(1), Value::from("Rock, Vol. \"1\""), Value::Real(2.5)],
                vec![Value::Integer(2), Value::Null, Value::Real(f64::NAN)],
            ],
            keys: vec![None, None],
            explain: Explain::new("table-scan"),
        }
    }

    #[test]
    fn test_csv_escapes_and_nulls() {
        let csv = sample().to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "AlbumId,Title,Score");
        assert_eq!(lines[1], "1,\"Rock, Vol. \"\"1\"\"\",2.5");
        assert!(lines[2].starts_with("2,,"));
    }

    #[test]
    fn test_json_objects() {
        let parsed: serde_json::Value = serde_json::from_str(&sample().to_json()).unwrap();
        assert_eq!(parsed[0]["AlbumId"], 1);
        assert_eq!(parsed[0]["Score"], 2.5);
        assert!(parsed[1]["Title"].is_null());
        // Non-finite reals have no JSON form
        assert!(parsed[1]["Score"].is_null());
    }

    #[test]
    fn test_value_lookup_and_explain_display() {
        let rs = sample();
        assert_eq!(rs.value(0, "albumid"), Some(&Value::Integer(1)));
        assert_eq!(rs.value(5, "AlbumId"), None);

        let mut explain = Explain::new("region-scan").focus(Position::new(1.0, 2.0), 3.0);
        explain.add_table("Album");
        explain.add_table("album");
        let text = explain.to_string();
        assert!(text.contains("strategy=region-scan"));
        assert!(text.contains("radius=3"));
        assert_eq!(explain.tables, vec!["Album".to_string()]);
    }
}
