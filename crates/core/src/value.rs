//! Value types crossing the engine seam
//!
//! This module defines the minimal value model the dispatch layer ferries
//! between caller closures and the engine binding. It is deliberately
//! small: five variants matching the storage classes every embedded SQL
//! engine exposes. No implicit coercions; different types are never equal.

use serde::{Deserialize, Serialize};

/// A single engine-level value.
///
/// ## The Five Types
///
/// 1. `Null` - SQL NULL / absence of value
/// 2. `Int` - 64-bit signed integer
/// 3. `Real` - 64-bit IEEE-754 floating point
/// 4. `Text` - UTF-8 encoded string
/// 5. `Blob` - arbitrary binary data (distinct from Text)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL / absence of value
    Null,

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit IEEE-754 floating point
    Real(f64),

    /// UTF-8 encoded string
    Text(String),

    /// Arbitrary binary data, NOT equivalent to Text
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the type name as a string (for error messages)
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Int(_) => "Int",
            Value::Real(_) => "Real",
            Value::Text(_) => "Text",
            Value::Blob(_) => "Blob",
        }
    }

    /// Get the integer value, if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the text value, if this is Text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Check for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

/// One result row: an ordered sequence of values.
pub type Row = Vec<Value>;
