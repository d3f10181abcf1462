//! Recursive-descent path resolution over a document's value tree.
//!
//! Resolution is resilient by design: a missing key, an out-of-range index,
//! or navigation into a scalar all resolve to `Null` rather than raising.
//! The only resolution failure is embedded JSON text that does not parse at
//! an unpack (`**`) segment.

use serde_json::Value;

use crate::mapping::model::Segment;

/// A path that could not be fully resolved. Bubbles up as a row error with
/// the owning table attached.
#[derive(Debug)]
pub struct ResolveIssue {
    pub segment: String,
    pub detail: String,
}

/// Walk `doc` segment by segment and return the resolved value.
///
/// Unpack segments parse String values as JSON and continue into the parsed
/// tree; already-parsed containers (jsonb columns) pass through unchanged;
/// any other shape resolves to `Null`.
pub fn resolve_path(doc: &Value, path: &[Segment]) -> Result<Value, ResolveIssue> {
    let mut current = doc.clone();
    for segment in path {
        current = match step(&current, segment) {
            Some(next) => next,
            None => return Ok(Value::Null),
        };
        if segment.unpack {
            current = unpack(current, segment)?;
        }
        if current.is_null() {
            return Ok(Value::Null);
        }
    }
    Ok(current)
}

fn step(current: &Value, segment: &Segment) -> Option<Value> {
    match current {
        Value::Object(map) => map.get(&segment.key).cloned(),
        Value::Array(items) => {
            let index: usize = segment.key.parse().ok()?;
            items.get(index).cloned()
        }
        _ => None,
    }
}

fn unpack(current: Value, segment: &Segment) -> Result<Value, ResolveIssue> {
    match current {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| ResolveIssue {
            segment: segment.key.clone(),
            detail: format!("`{}` is not valid embedded JSON: {e}", segment.key),
        }),
        // jsonb-style columns arrive pre-parsed.
        parsed @ (Value::Object(_) | Value::Array(_)) => Ok(parsed),
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::model::Segment;
    use serde_json::json;

    fn plain(keys: &[&str]) -> Vec<Segment> {
        keys.iter().map(|k| Segment::plain(*k)).collect()
    }

    #[test]
    fn test_nested_access() {
        let doc = json!({"a": {"b": {"c": 7}}});
        assert_eq!(resolve_path(&doc, &plain(&["a", "b", "c"])).unwrap(), json!(7));
    }

    #[test]
    fn test_missing_key_resolves_to_null() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(resolve_path(&doc, &plain(&["a", "x", "y"])).unwrap(), json!(null));
        assert_eq!(resolve_path(&doc, &plain(&["nope"])).unwrap(), json!(null));
    }

    #[test]
    fn test_navigation_into_scalar_resolves_to_null() {
        let doc = json!({"a": 1});
        assert_eq!(resolve_path(&doc, &plain(&["a", "b"])).unwrap(), json!(null));
    }

    #[test]
    fn test_array_index() {
        let doc = json!({"items": [{"x": 1}, {"x": 2}]});
        let path = vec![Segment::plain("items"), Segment::plain("1"), Segment::plain("x")];
        assert_eq!(resolve_path(&doc, &path).unwrap(), json!(2));

        let out_of_range = vec![Segment::plain("items"), Segment::plain("9")];
        assert_eq!(resolve_path(&doc, &out_of_range).unwrap(), json!(null));
    }

    #[test]
    fn test_unpack_string_then_navigate() {
        let doc = json!({"details": "{\"id\": 9}"});
        let path = vec![Segment::unpacked("details"), Segment::plain("id")];
        assert_eq!(resolve_path(&doc, &path).unwrap(), json!(9));
    }

    #[test]
    fn test_unpack_passes_parsed_containers_through() {
        let doc = json!({"details": {"id": 9}});
        let path = vec![Segment::unpacked("details"), Segment::plain("id")];
        assert_eq!(resolve_path(&doc, &path).unwrap(), json!(9));
    }

    #[test]
    fn test_unpack_non_string_scalar_is_null() {
        let doc = json!({"details": 42});
        let path = vec![Segment::unpacked("details"), Segment::plain("id")];
        assert_eq!(resolve_path(&doc, &path).unwrap(), json!(null));
    }

    #[test]
    fn test_unpack_invalid_json_is_an_error() {
        let doc = json!({"details": "{not json"});
        let path = vec![Segment::unpacked("details")];
        let err = resolve_path(&doc, &path).unwrap_err();
        assert!(err.detail.contains("not valid embedded JSON"));
    }
}
