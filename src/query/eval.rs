//! # Relations and Predicates
//!
//! A `Relation` is the working table of one SELECT: columns from one or
//! more sources (a table or a CTE), rows of values, and the payload each
//! row came from per source. Expressions are bound to column slots once,
//! then evaluated with SQL three-valued logic (`None` is UNKNOWN).

use std::cmp::Ordering;

use crate::core::{MycoError, MycoResult, PayloadKey, TableId, Value};

use super::sql::{CmpOp, ColumnRef, Expr, Operand};

// ============================================================================
// Relation
// ============================================================================

/// One input of a relation
#[derive(Debug, Clone)]
pub(crate) struct Source {
    /// Alias or name used to qualify its columns
    pub qualifier: String,
    /// Backing table; `None` for a CTE
    pub table: Option<TableId>,
    /// First column slot
    pub offset: usize,
    pub width: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Tuple {
    pub values: Vec<Value>,
    /// Source payload per input, aligned with `Relation::sources`
    pub keys: Vec<Option<PayloadKey>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Relation {
    pub columns: Vec<String>,
    pub sources: Vec<Source>,
    pub rows: Vec<Tuple>,
}

impl Relation {
    /// Single-source relation
    pub fn single(qualifier: &str, table: Option<TableId>, columns: Vec<String>) -> Self {
        let width = columns.len();
        Self {
            columns,
            sources: vec![Source {
                qualifier: qualifier.to_string(),
                table,
                offset: 0,
                width,
            }],
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, values: Vec<Value>, key: Option<PayloadKey>) {
        self.rows.push(Tuple {
            values,
            keys: vec![key],
        });
    }

    pub fn source(&self, qualifier: &str) -> Option<&Source> {
        self.sources
            .iter()
            .find(|s| s.qualifier.eq_ignore_ascii_case(qualifier))
    }

    /// Column slot of a reference; unqualified names take the first match
    pub fn resolve(&self, column: &ColumnRef) -> MycoResult<usize> {
        let (range, owner) = match &column.qualifier {
            Some(q) => {
                let source = self.source(q).ok_or_else(|| MycoError::UnknownColumn {
                    table: q.clone(),
                    column: column.name.clone(),
                })?;
                (source.offset..source.offset + source.width, source.qualifier.as_str())
            }
            None => (
                0..self.columns.len(),
                self.sources.first().map(|s| s.qualifier.as_str()).unwrap_or(""),
            ),
        };
        range
            .clone()
            .find(|&i| self.columns[i].eq_ignore_ascii_case(&column.name))
            .ok_or_else(|| MycoError::UnknownColumn {
                table: owner.to_string(),
                column: column.name.clone(),
            })
    }

    /// Append another relation's columns as a new source (rows untouched)
    pub fn extend_schema(&mut self, qualifier: &str, table: Option<TableId>, columns: &[String]) {
        self.sources.push(Source {
            qualifier: qualifier.to_string(),
            table,
            offset: self.columns.len(),
            width: columns.len(),
        });
        self.columns.extend(columns.iter().cloned());
    }
}

/// Hashable identity of a value under SQL equality: numbers compare by
/// magnitude, everything else by text. NULL has none.
pub(crate) fn value_key(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match value.as_f64() {
        Some(f) => Some(format!("n{}", f)),
        None => Some(format!("t{}", value)),
    }
}

/// Identity of a whole row for DISTINCT / UNION / GROUP BY
pub(crate) fn row_key(values: &[Value]) -> Vec<Option<String>> {
    values.iter().map(value_key).collect()
}

// ============================================================================
// Bound expressions
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Column(usize),
    Literal(Value),
}

impl Slot {
    fn get<'v>(&'v self, row: &'v [Value]) -> &'v Value {
        match self {
            Slot::Column(i) => row.get(*i).unwrap_or(&Value::Null),
            Slot::Literal(v) => v,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Cmp(Slot, CmpOp, Slot),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Like { operand: Slot, pattern: Slot, negated: bool },
    In { operand: Slot, list: Vec<Slot>, negated: bool },
    Between { operand: Slot, low: Slot, high: Slot, negated: bool },
    IsNull { operand: Slot, negated: bool },
}

fn bind_operand(operand: &Operand, relation: &Relation) -> MycoResult<Slot> {
    Ok(match operand {
        Operand::Column(col) => Slot::Column(relation.resolve(col)?),
        Operand::Literal(v) => Slot::Literal(v.clone()),
    })
}

/// Resolve every column of an expression against a relation
pub(crate) fn bind(expr: &Expr, relation: &Relation) -> MycoResult<Predicate> {
    Ok(match expr {
        Expr::Cmp(a, op, b) => Predicate::Cmp(bind_operand(a, relation)?, *op, bind_operand(b, relation)?),
        Expr::And(a, b) => Predicate::And(Box::new(bind(a, relation)?), Box::new(bind(b, relation)?)),
        Expr::Or(a, b) => Predicate::Or(Box::new(bind(a, relation)?), Box::new(bind(b, relation)?)),
        Expr::Not(a) => Predicate::Not(Box::new(bind(a, relation)?)),
        Expr::Like {
            operand,
            pattern,
            negated,
        } => Predicate::Like {
            operand: bind_operand(operand, relation)?,
            pattern: bind_operand(pattern, relation)?,
            negated: *negated,
        },
        Expr::In {
            operand,
            list,
            negated,
        } => Predicate::In {
            operand: bind_operand(operand, relation)?,
            list: list
                .iter()
                .map(|o| bind_operand(o, relation))
                .collect::<MycoResult<_>>()?,
            negated: *negated,
        },
        Expr::Between {
            operand,
            low,
            high,
            negated,
        } => Predicate::Between {
            operand: bind_operand(operand, relation)?,
            low: bind_operand(low, relation)?,
            high: bind_operand(high, relation)?,
            negated: *negated,
        },
        Expr::IsNull { operand, negated } => Predicate::IsNull {
            operand: bind_operand(operand, relation)?,
            negated: *negated,
        },
    })
}

fn negate_if(result: Option<bool>, negated: bool) -> Option<bool> {
    result.map(|b| b != negated)
}

fn compare(a: &Value, op: CmpOp, b: &Value) -> Option<bool> {
    let ord = a.compare(b)?;
    Some(match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    })
}

impl Predicate {
    /// Three-valued evaluation; rows pass a filter only on `Some(true)`
    pub fn eval(&self, row: &[Value]) -> Option<bool> {
        match self {
            Predicate::Cmp(a, op, b) => compare(a.get(row), *op, b.get(row)),
            Predicate::And(a, b) => match (a.eval(row), b.eval(row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Predicate::Or(a, b) => match (a.eval(row), b.eval(row)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Predicate::Not(a) => a.eval(row).map(|b| !b),
            Predicate::Like {
                operand,
                pattern,
                negated,
            } => {
                let (value, pattern) = (operand.get(row), pattern.get(row));
                if value.is_null() || pattern.is_null() {
                    return None;
                }
                negate_if(Some(like(&value.to_string(), &pattern.to_string())), *negated)
            }
            Predicate::In {
                operand,
                list,
                negated,
            } => {
                let value = operand.get(row);
                if value.is_null() {
                    return None;
                }
                let mut unknown = false;
                for item in list {
                    match compare(value, CmpOp::Eq, item.get(row)) {
                        Some(true) => return negate_if(Some(true), *negated),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    negate_if(Some(false), *negated)
                }
            }
            Predicate::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let value = operand.get(row);
                let lower = compare(value, CmpOp::Ge, low.get(row));
                let upper = compare(value, CmpOp::Le, high.get(row));
                let inside = match (lower, upper) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                negate_if(inside, *negated)
            }
            Predicate::IsNull { operand, negated } => Some(operand.get(row).is_null() != *negated),
        }
    }

    pub fn passes(&self, row: &[Value]) -> bool {
        self.eval(row) == Some(true)
    }
}

/// Case-insensitive LIKE: `%` any run, `_` one character
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let (mut t, mut p) = (0, 0);
    // Backtrack point: (pattern index after '%', text index it matched up to)
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            p += 1;
            star = Some((p, t));
        } else if let Some((sp, st)) = star {
            p = sp;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sql::parse_expr;

    fn relation() -> Relation {
        let mut rel = Relation::single(
            "a",
            Some(TableId(1)),
            vec!["AlbumId".into(), "Title".into(), "ArtistId".into()],
        );
        rel.extend_schema("ar", Some(TableId(0)), &["ArtistId".into(), "Name".into()]);
        rel
    }

    fn check(expr: &str, row: &[Value]) -> Option<bool> {
        let rel = relation();
        bind(&parse_expr(expr).unwrap(), &rel).unwrap().eval(row)
    }

    fn row() -> Vec<Value> {
        vec![
            Value::Integer(1),
            Value::from("For Those About To Rock"),
            Value::Integer(5),
            Value::Integer(5),
            Value::Null,
        ]
    }

    #[test]
    fn test_resolve_qualified_and_bare() {
        let rel = relation();
        assert_eq!(rel.resolve(&ColumnRef::bare("artistid")).unwrap(), 2);
        let qualified = ColumnRef {
            qualifier: Some("AR".into()),
            name: "ArtistId".into(),
        };
        assert_eq!(rel.resolve(&qualified).unwrap(), 3);
        assert!(matches!(
            rel.resolve(&ColumnRef::bare("Nope")),
            Err(MycoError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_comparisons_coerce_numbers() {
        assert_eq!(check("ArtistId = '5'", &row()), Some(true));
        assert_eq!(check("a.ArtistId = ar.ArtistId", &row()), Some(true));
        assert_eq!(check("AlbumId >= 2", &row()), Some(false));
        assert_eq!(check("Title <> 'x'", &row()), Some(true));
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(check("Name = 'x'", &row()), None);
        assert_eq!(check("Name = 'x' OR AlbumId = 1", &row()), Some(true));
        assert_eq!(check("Name = 'x' AND AlbumId = 2", &row()), Some(false));
        assert_eq!(check("NOT Name = 'x'", &row()), None);
        assert_eq!(check("Name IS NULL", &row()), Some(true));
        assert_eq!(check("Title IS NOT NULL", &row()), Some(true));
        assert_eq!(check("AlbumId IN (3, NULL)", &row()), None);
        assert_eq!(check("AlbumId NOT IN (2, 3)", &row()), Some(true));
        assert_eq!(check("ArtistId BETWEEN 1 AND 5", &row()), Some(true));
        assert_eq!(check("ArtistId NOT BETWEEN 1 AND 5", &row()), Some(false));
    }

    #[test]
    fn test_like() {
        assert!(like("For Those About To Rock", "for%rock"));
        assert!(like("abc", "a_c"));
        assert!(like("abc", "%"));
        assert!(like("", "%%"));
        assert!(!like("abc", "a_"));
        assert!(like("aXbXc", "%x%c"));
        assert!(!like("abc", "%d%"));
        assert_eq!(check("Title LIKE '%about%'", &row()), Some(true));
        assert_eq!(check("Title NOT LIKE 'for%'", &row()), Some(false));
    }

    #[test]
    fn test_value_key_matches_sql_equality() {
        assert_eq!(value_key(&Value::Integer(5)), value_key(&Value::Real(5.0)));
        assert_eq!(value_key(&Value::Integer(5)), value_key(&Value::from("5")));
        assert_ne!(value_key(&Value::from("a")), value_key(&Value::from("b")));
        assert_eq!(value_key(&Value::Null), None);
    }
}
