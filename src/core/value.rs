//! # Value
//!
//! Typed field values. Literals from SQL dumps keep their natural type:
//! quoted text stays text, bare numbers become integers or reals.

use std::cmp::Ordering;
use std::fmt;

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Interpret an unquoted SQL literal
    pub fn from_literal(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return Value::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return Value::Real(f);
            }
        }
        Value::Text(raw.to_string())
    }

    /// Build a value from text supplied by a caller (ABI, shell). Quoted
    /// input is always text; bare input follows `from_literal`.
    pub fn parse_loose(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(inner) = unquote(trimmed) {
            return Value::Text(inner.to_string());
        }
        if trimmed.is_empty() {
            return Value::Text(String::new());
        }
        Value::from_literal(trimmed)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view, coercing numeric-looking text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            Value::Null => None,
        }
    }

    /// Integer view, coercing integral text and reals
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// SQL comparison. `None` when either side is NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        Some(self.to_string().cmp(&other.to_string()))
    }

    /// SQL equality (NULL never equals anything)
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order used for ORDER BY: NULL first, then numbers, then text
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => self.to_string().cmp(&other.to_string()),
            },
        }
    }

    /// Stable byte tag for the image codec
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Real(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

/// Strip one pair of matching single or double quotes
pub(crate) fn unquote(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_literal() {
        assert_eq!(Value::from_literal("42"), Value::Integer(42));
        assert_eq!(Value::from_literal("4.5"), Value::Real(4.5));
        assert_eq!(Value::from_literal("NULL"), Value::Null);
        assert_eq!(Value::from_literal("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn test_numeric_comparison_coerces_text() {
        let a = Value::Text("10".into());
        let b = Value::Integer(9);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert!(Value::Text("5".into()).sql_eq(&Value::Integer(5)));
    }

    #[test]
    fn test_null_never_equal() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_sort_cmp_orders_nulls_first() {
        let mut values = vec![Value::Text("b".into()), Value::Integer(3), Value::Null, Value::Integer(1)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Integer(1));
        assert_eq!(values[3], Value::Text("b".into()));
    }
}
