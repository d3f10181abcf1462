//! Snowflake expansion: one document in, rows for a whole table forest out.
//!
//! Given a compiled mapping and one document, the normalizer produces the
//! root table's row plus, recursively, the rows of every descendant table.
//! A parent row's primary key is always finalized before its children are
//! visited, and emitted rows preserve source document and array order.

pub mod keys;
pub mod resolve;

pub use keys::{ContentHashKeys, CounterKeys, KeyGenerator};
pub use resolve::resolve_path;

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::mapping::model::{FieldRule, KeyRule, MappingSpec};
use crate::value::coerce_scalar;

/// What to do when an explicit primary-key rule resolves to Null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullKeyPolicy {
    /// Fail the run. The default: a silent gap in an explicitly keyed table
    /// is worse than a loud stop.
    #[default]
    Abort,
    /// Drop the row (and its would-be children) and count it in the report.
    Skip,
}

/// One destination row produced by normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Index of the owning table in the mapping.
    pub table: usize,
    /// Primary-key value (explicit or generated).
    pub key: Value,
    /// Parent row's primary-key value. `None` for root-table rows.
    pub parent_key: Option<Value>,
    /// Destination column name → resolved scalar value, in rule order.
    pub columns: Vec<(String, Value)>,
}

/// Expands documents against one mapping, carrying key-generation state
/// across documents so surrogate sequences stay monotonic for a whole run.
pub struct Normalizer<'a> {
    spec: &'a MappingSpec,
    keys: Box<dyn KeyGenerator>,
    policy: NullKeyPolicy,
    skipped: u64,
}

impl<'a> Normalizer<'a> {
    pub fn new(spec: &'a MappingSpec, keys: Box<dyn KeyGenerator>, policy: NullKeyPolicy) -> Self {
        Normalizer {
            spec,
            keys,
            policy,
            skipped: 0,
        }
    }

    /// Rows skipped so far under [`NullKeyPolicy::Skip`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Continue `table`'s surrogate sequence past `start`.
    pub fn seed_key(&mut self, table: &str, start: u64) {
        self.keys.seed(table, start);
    }

    /// Expand one document into rows for `table` and all its descendants.
    /// Rows come out parent-before-child, children in source array order.
    pub fn expand(&mut self, table: usize, doc: &Value) -> Result<Vec<NormalizedRow>> {
        let mut rows = Vec::new();
        self.expand_into(table, doc, None, &mut rows)?;
        Ok(rows)
    }

    fn expand_into(
        &mut self,
        table: usize,
        doc: &Value,
        parent_key: Option<&Value>,
        out: &mut Vec<NormalizedRow>,
    ) -> Result<()> {
        let spec = &self.spec.tables[table];

        let mut columns = Vec::new();
        let mut explicit_key = None;
        let mut fanouts: Vec<(usize, Vec<Value>)> = Vec::new();

        for rule in &spec.fields {
            match rule {
                FieldRule::Scalar {
                    path,
                    column,
                    primary_key,
                } => {
                    let resolved =
                        resolve_path(doc, path).map_err(|issue| EngineError::Row {
                            table: spec.destination.clone(),
                            detail: issue.detail,
                        })?;
                    let value = coerce_scalar(resolved);
                    if *primary_key {
                        explicit_key = Some(value.clone());
                    }
                    columns.push((column.name.clone(), value));
                }
                FieldRule::Fanout { path, child, .. } => {
                    let resolved =
                        resolve_path(doc, path).map_err(|issue| EngineError::Row {
                            table: spec.destination.clone(),
                            detail: issue.detail,
                        })?;
                    // A non-array fanout value is an empty fanout, not an
                    // error: zero child rows.
                    if let Value::Array(items) = resolved {
                        fanouts.push((*child, items));
                    }
                }
            }
        }

        // The key must be final before any child is visited.
        let key = match (&spec.primary_key, explicit_key) {
            (KeyRule::Explicit { .. }, Some(value)) => {
                if value.is_null() {
                    match self.policy {
                        NullKeyPolicy::Skip => {
                            self.skipped += 1;
                            return Ok(());
                        }
                        NullKeyPolicy::Abort => {
                            return Err(EngineError::Row {
                                table: spec.destination.clone(),
                                detail: "explicit primary key resolved to null".into(),
                            })
                        }
                    }
                }
                value
            }
            _ => self.keys.next_key(&spec.destination, &columns),
        };

        out.push(NormalizedRow {
            table,
            key: key.clone(),
            parent_key: parent_key.cloned(),
            columns,
        });

        for (child, items) in fanouts {
            for item in items {
                self.expand_into(child, &item, Some(&key), out)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::model::CompileOptions;
    use crate::mapping::parser::compile_mapping;
    use serde_json::json;

    fn normalizer(spec: &MappingSpec, policy: NullKeyPolicy) -> Normalizer<'_> {
        Normalizer::new(spec, Box::new(CounterKeys::new()), policy)
    }

    const EMBEDDED_MAPPING: &str = r#"
public.orders:
  staging.orders:
    details**.id*: { order_id: bigint }
    details**.items:
public.orders.details.items:
  staging.order_items:
    x: { x: int }
"#;

    #[test]
    fn test_embedded_json_snowflake() {
        let spec = compile_mapping(EMBEDDED_MAPPING, &CompileOptions::default()).unwrap();
        let doc = json!({
            "id": 1,
            "details": "{\"id\":9,\"items\":[{\"x\":1},{\"x\":2}]}"
        });

        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);
        let rows = normalizer.expand(0, &doc).unwrap();

        assert_eq!(rows.len(), 3);

        let parent = &rows[0];
        assert_eq!(parent.key, json!(9));
        assert_eq!(parent.parent_key, None);
        assert_eq!(parent.columns, vec![("order_id".to_string(), json!(9))]);

        // Two children, source array order, foreign key = parent key.
        assert_eq!(rows[1].parent_key, Some(json!(9)));
        assert_eq!(rows[1].columns, vec![("x".to_string(), json!(1))]);
        assert_eq!(rows[2].parent_key, Some(json!(9)));
        assert_eq!(rows[2].columns, vec![("x".to_string(), json!(2))]);
    }

    #[test]
    fn test_fanout_count_matches_array_length() {
        let spec = compile_mapping(EMBEDDED_MAPPING, &CompileOptions::default()).unwrap();
        let items: Vec<_> = (0..5).map(|x| json!({"x": x})).collect();
        let doc = json!({
            "details": json!({"id": 3, "items": items}).to_string()
        });

        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);
        let rows = normalizer.expand(0, &doc).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows[1..].iter().all(|r| r.parent_key == Some(json!(3))));
    }

    #[test]
    fn test_absent_paths_resolve_to_null() {
        let mapping = r#"
public.t:
  dest.t:
    a__deep__path: { a: varchar }
    b: { b: int }
"#;
        let spec = compile_mapping(mapping, &CompileOptions::default()).unwrap();
        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);

        // Document missing every mapped path still normalizes.
        let rows = normalizer.expand(0, &json!({})).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns[0].1, json!(null));
        assert_eq!(rows[0].columns[1].1, json!(null));
        // Surrogate key still assigned.
        assert_eq!(rows[0].key, json!(1));
    }

    #[test]
    fn test_fanout_of_non_array_yields_no_children() {
        let spec = compile_mapping(EMBEDDED_MAPPING, &CompileOptions::default()).unwrap();
        let doc = json!({"details": "{\"id\":4,\"items\":\"oops\"}"});

        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);
        let rows = normalizer.expand(0, &doc).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_null_explicit_key_abort() {
        let spec = compile_mapping(EMBEDDED_MAPPING, &CompileOptions::default()).unwrap();
        let doc = json!({"details": "{\"items\":[{\"x\":1}]}"});

        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);
        let err = normalizer.expand(0, &doc).unwrap_err();
        assert!(matches!(err, EngineError::Row { .. }));
    }

    #[test]
    fn test_null_explicit_key_skip_drops_children_too() {
        let spec = compile_mapping(EMBEDDED_MAPPING, &CompileOptions::default()).unwrap();
        let doc = json!({"details": "{\"items\":[{\"x\":1}]}"});

        let mut normalizer = normalizer(&spec, NullKeyPolicy::Skip);
        let rows = normalizer.expand(0, &doc).unwrap();
        assert!(rows.is_empty());
        assert_eq!(normalizer.skipped(), 1);
    }

    #[test]
    fn test_surrogate_keys_are_monotonic_across_documents() {
        let mapping = r#"
public.t:
  dest.t:
    a: { a: int }
"#;
        let spec = compile_mapping(mapping, &CompileOptions::default()).unwrap();
        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);

        let first = normalizer.expand(0, &json!({"a": 1})).unwrap();
        let second = normalizer.expand(0, &json!({"a": 2})).unwrap();
        assert_eq!(first[0].key, json!(1));
        assert_eq!(second[0].key, json!(2));
    }

    #[test]
    fn test_container_scalar_serialized_to_text() {
        let mapping = r#"
public.t:
  dest.t:
    meta: { meta: varchar }
"#;
        let spec = compile_mapping(mapping, &CompileOptions::default()).unwrap();
        let mut normalizer = normalizer(&spec, NullKeyPolicy::Abort);
        let rows = normalizer.expand(0, &json!({"meta": {"k": 1}})).unwrap();
        assert_eq!(rows[0].columns[0].1, json!("{\"k\":1}"));
    }
}
