//! In-memory shape of source data during navigation.
//!
//! The engine navigates plain `serde_json::Value` trees: the tagged
//! {Null, Bool, Number, String, Array, Object} variant is exactly the shape
//! one source document takes while rules resolve against it. This module adds
//! the `Document` wrapper for one fetched row, scalar coercion, and SQL
//! literal rendering for multi-row inserts.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One fetched source row: original column values keyed by column name,
/// JSON-bearing columns kept as raw `String` until a rule unpacks them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(pub Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View the document as a navigable value tree.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

/// Coerce a resolved value into the scalar destination shape.
///
/// Scalars pass through unchanged; the declared type token is opaque to the
/// engine, so no numeric/text conversion is attempted here. Objects and
/// arrays that reach a scalar column are serialized back to their compact
/// JSON string form.
pub fn coerce_scalar(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => {
            Value::String(serde_json::to_string(&value).unwrap_or_default())
        }
        other => other,
    }
}

/// Render one value as a SQL literal for a multi-row VALUES clause.
///
/// Strings double their quotes and escape backslashes, booleans render
/// lowercase, nulls render as NULL, containers render as quoted JSON text.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Object(_) | Value::Array(_) => {
            quote(&serde_json::to_string(value).unwrap_or_default())
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "''");
    format!("'{}'", escaped)
}

/// Render a sequence of row tuples as `(a, b), (c, d), ...`.
pub fn render_values(tuples: &[Vec<Value>]) -> String {
    tuples
        .iter()
        .map(|tuple| {
            let rendered: Vec<String> = tuple.iter().map(sql_literal).collect();
            format!("({})", rendered.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Total-ish order over scalar values, used for watermark tracking.
///
/// Numbers compare numerically, strings lexicographically; a Null always
/// sorts below any non-null value. Mixed or container values compare equal
/// so a bad watermark column never panics the run.
pub fn scalar_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
