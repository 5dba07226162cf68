//! Universal value type for primary values, properties and tag applications.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Ndef;

/// A value stored on a node.
///
/// Covers the types the engine needs to reason about:
/// - Scalars: Bool, Int, Str, Bytes
/// - Containers: List
/// - Graph: Ndef (a `(form, value)` reference to another node)
/// - Temporal: Time, Ival (half-open millisecond interval, used by tags)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),

    // Graph types
    Ndef(Box<Ndef>),

    // Temporal types
    Time(DateTime<Utc>),
    Ival { min: i64, max: i64 },
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    /// Name of the value's type, as spelled in model type declarations.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Ndef(_) => "ndef",
            Value::Time(_) => "time",
            Value::Ival { .. } => "ival",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Build an interval value. Bounds are ordered so `min <= max`.
    pub fn ival(a: i64, b: i64) -> Self {
        Value::Ival { min: a.min(b), max: a.max(b) }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ndef(&self) -> Option<&Ndef> {
        match self {
            Value::Ndef(n) => Some(n),
            _ => None,
        }
    }

    /// Combine a newly applied value with an existing one.
    ///
    /// Two intervals widen to cover both; a null new value keeps the
    /// existing one; anything else replaces it.
    pub fn merged(existing: &Value, new: &Value) -> Value {
        match (existing, new) {
            (Value::Ival { min: a, max: b }, Value::Ival { min: c, max: d }) => {
                Value::Ival { min: (*a).min(*c), max: (*b).max(*d) }
            }
            (old, Value::Null) => old.clone(),
            (_, new) => new.clone(),
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }
impl From<Ndef> for Value { fn from(v: Ndef) -> Self { Value::Ndef(Box::new(v)) } }
impl From<DateTime<Utc>> for Value { fn from(v: DateTime<Utc>) -> Self { Value::Time(v) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Display
// ============================================================================

fn fmt_millis(f: &mut fmt::Formatter<'_>, ms: i64) -> fmt::Result {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => write!(f, "{}", dt.format("%Y/%m/%d %H:%M:%S%.3f")),
        None => write!(f, "{ms}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Bytes(b) => write!(f, "<bytes[{}]>", b.len()),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Ndef(n) => write!(f, "({}, {})", n.form, n.value),
            Value::Time(dt) => write!(f, "{dt}"),
            Value::Ival { min, max } => {
                write!(f, "(")?;
                fmt_millis(f, *min)?;
                write!(f, ", ")?;
                fmt_millis(f, *max)?;
                write!(f, ")")
            }
        }
    }
}
