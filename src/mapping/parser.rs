//! Mapping grammar parser.
//!
//! Compiles YAML mapping text into a [`MappingSpec`]. The grammar knows two
//! styles per root entry:
//!
//! - *Body style*: `schema.table:`. Every rule key is a source path into
//!   the row's JSON columns (`.` nested access, `__` flatten, `**` unpack
//!   embedded JSON text, trailing `*` primary key). A rule with no
//!   `{dest: type}` literal fans its array value into a child table declared
//!   as `schema.table.<path>`.
//! - *Header style*: `schema.table[a + b**]:`. The bracketed list names the
//!   selected columns; `**` entries are parsed and merged into a generic
//!   namespace the body rules then map from.
//!
//! All marker characters are interpreted exactly once, here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value as Yaml;

use crate::error::{EngineError, Result};
use crate::mapping::model::{
    ColumnDef, CompileOptions, FieldRule, HeaderField, KeyRule, MappingSpec, Segment, SelectPlan,
    TableSpec,
};

static TABLE_IDENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<table>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\[(?P<fields>[^\[\]]+)\]\s*$").unwrap()
});

/// Compile mapping text into an immutable mapping model.
///
/// Compiling the same text twice yields structurally identical models; the
/// YAML mapping's declaration order is preserved throughout.
pub fn compile_mapping(text: &str, options: &CompileOptions) -> Result<MappingSpec> {
    let doc: serde_yaml::Mapping = serde_yaml::from_str(text)
        .map_err(|e| EngineError::Parse(format!("invalid mapping YAML: {e}")))?;

    let mut entries = Vec::new();
    for (key, value) in &doc {
        let key = yaml_str(key, "table entry key")?;
        entries.push(parse_entry(&key, value)?);
    }
    if entries.is_empty() {
        return Err(EngineError::Parse("mapping declares no tables".into()));
    }

    build_spec(entries, options)
}

/// One parsed (not yet wired) table entry.
struct ParsedEntry {
    entry: String,
    header: Option<Vec<HeaderField>>,
    destination: String,
    rules: Vec<RawRule>,
}

/// One parsed field rule; `dest` is `None` for list-fanout rules.
struct RawRule {
    raw: String,
    path: Vec<Segment>,
    primary_key: bool,
    dest: Option<ColumnDef>,
}

fn parse_entry(key: &str, value: &Yaml) -> Result<ParsedEntry> {
    let (entry, header) = parse_entry_key(key)?;

    let body = value.as_mapping().ok_or_else(|| {
        EngineError::Parse(format!("entry `{entry}` must map to a destination table"))
    })?;
    if body.len() != 1 {
        return Err(EngineError::Parse(format!(
            "entry `{entry}` must declare exactly one destination table, found {}",
            body.len()
        )));
    }
    let (dest_key, rules_value) = body.iter().next().unwrap();
    let destination = yaml_str(dest_key, "destination table name")?;
    if !TABLE_IDENT_RE.is_match(&destination) {
        return Err(EngineError::Parse(format!(
            "malformed destination table identifier `{destination}`"
        )));
    }

    let mut rules = Vec::new();
    match rules_value {
        Yaml::Null => {}
        Yaml::Mapping(mapping) => {
            for (rule_key, rule_value) in mapping {
                let raw = yaml_str(rule_key, "field rule key")?;
                rules.push(parse_rule(&entry, &raw, rule_value)?);
            }
        }
        _ => {
            return Err(EngineError::Parse(format!(
                "field rules of `{destination}` must be a mapping"
            )))
        }
    }

    Ok(ParsedEntry {
        entry,
        header,
        destination,
        rules,
    })
}

fn parse_entry_key(key: &str) -> Result<(String, Option<Vec<HeaderField>>)> {
    let key = key.trim();
    if key.contains('[') {
        let captures = HEADER_RE.captures(key).ok_or_else(|| {
            EngineError::Parse(format!("malformed table identifier `{key}`"))
        })?;
        let table = captures["table"].to_string();
        let mut fields = Vec::new();
        for item in captures["fields"].split('+') {
            let item = item.trim();
            let (name, unpack) = match item.strip_suffix("**") {
                Some(name) => (name.trim(), true),
                None => (item, false),
            };
            if name.is_empty() || name.contains('*') {
                return Err(EngineError::Parse(format!(
                    "malformed header field `{item}` in `{key}`"
                )));
            }
            fields.push(HeaderField {
                name: name.to_string(),
                unpack,
            });
        }
        if fields.is_empty() {
            return Err(EngineError::Parse(format!("empty header field list in `{key}`")));
        }
        Ok((table, Some(fields)))
    } else {
        if !TABLE_IDENT_RE.is_match(key) {
            return Err(EngineError::Parse(format!("malformed table identifier `{key}`")));
        }
        Ok((key.to_string(), None))
    }
}

fn parse_rule(entry: &str, raw: &str, value: &Yaml) -> Result<RawRule> {
    // Trailing markers: one `*` is the primary key, `**` unpacks the last
    // segment, `***` is both.
    let trimmed = raw.trim_end_matches('*');
    let stars = raw.len() - trimmed.len();
    if stars > 3 {
        return Err(EngineError::Parse(format!(
            "too many `*` markers on `{raw}` in `{entry}`"
        )));
    }
    let primary_key = stars % 2 == 1;
    let unpack_last = stars >= 2;

    let mut path = parse_path(entry, raw, trimmed)?;
    if unpack_last {
        path.last_mut().unwrap().unpack = true;
    }

    let dest = match value {
        // No destination literal: the value fans out into a child table.
        Yaml::Null => None,
        Yaml::Mapping(mapping) if mapping.len() == 1 => {
            let (name, ty) = mapping.iter().next().unwrap();
            let name = yaml_str(name, "destination column name")?;
            let ty = yaml_str(ty, "destination column type")?;
            Some(ColumnDef { name, ty })
        }
        _ => {
            return Err(EngineError::Parse(format!(
                "rule `{raw}` in `{entry}` must be `{{column: type}}` or empty"
            )))
        }
    };

    if dest.is_none() && primary_key {
        return Err(EngineError::Parse(format!(
            "rule `{raw}` in `{entry}` cannot be both a primary key and a fanout"
        )));
    }

    Ok(RawRule {
        raw: raw.to_string(),
        path,
        primary_key,
        dest,
    })
}

/// Split a marker-stripped source key into path segments. `.` and `__` both
/// navigate one object level; `__` additionally signals that the path
/// flattens into a single destination column, which by this point is already
/// expressed by the rule's one `{dest: type}` literal.
fn parse_path(entry: &str, raw: &str, trimmed: &str) -> Result<Vec<Segment>> {
    let mut path = Vec::new();
    for part in trimmed.split('.') {
        for sub in part.split("__") {
            let (key, unpack) = match sub.strip_suffix("**") {
                Some(key) => (key, true),
                None => (sub, false),
            };
            if key.is_empty() || key.contains('*') {
                return Err(EngineError::Parse(format!(
                    "malformed path segment `{sub}` in rule `{raw}` of `{entry}`"
                )));
            }
            path.push(Segment {
                key: key.to_string(),
                unpack,
            });
        }
    }
    if path.is_empty() {
        return Err(EngineError::Parse(format!("empty source path in `{entry}`")));
    }
    Ok(path)
}

fn build_spec(entries: Vec<ParsedEntry>, options: &CompileOptions) -> Result<MappingSpec> {
    // Parent linkage: the longest previously declared entry that is a dotted
    // prefix of this one. Entries with no declared prefix are roots.
    let mut tables: Vec<TableSpec> = Vec::new();
    for parsed in &entries {
        let parent = tables
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                parsed.entry.starts_with(&t.entry)
                    && parsed.entry[t.entry.len()..].starts_with('.')
            })
            .max_by_key(|(_, t)| t.entry.len())
            .map(|(i, _)| i);

        if parent.is_some() && parsed.header.is_some() {
            return Err(EngineError::Resolution(format!(
                "child table `{}` cannot declare a header field list",
                parsed.entry
            )));
        }

        let mut fields = Vec::new();
        let mut explicit_key = None;
        for rule in &parsed.rules {
            if rule.primary_key {
                if explicit_key.is_some() {
                    return Err(EngineError::Resolution(format!(
                        "table `{}` declares more than one primary key",
                        parsed.entry
                    )));
                }
                explicit_key = Some(fields.len());
            }
            match &rule.dest {
                Some(column) => fields.push(FieldRule::Scalar {
                    path: rule.path.clone(),
                    column: column.clone(),
                    primary_key: rule.primary_key,
                }),
                None => fields.push(FieldRule::Fanout {
                    path: rule.path.clone(),
                    source: rule.raw.clone(),
                    // Wired to the declared child entry below.
                    child: usize::MAX,
                }),
            }
        }

        let primary_key = match explicit_key {
            Some(rule) => KeyRule::Explicit { rule },
            None => KeyRule::Surrogate {
                column: ColumnDef {
                    name: options.surrogate_key_name.clone(),
                    ty: options.surrogate_key_type.clone(),
                },
            },
        };

        let select = if parent.is_none() {
            Some(match &parsed.header {
                Some(fields) => SelectPlan::Header {
                    fields: fields.clone(),
                },
                None => SelectPlan::Body {
                    columns: body_select_columns(&parsed.rules),
                },
            })
        } else {
            None
        };

        tables.push(TableSpec {
            entry: parsed.entry.clone(),
            source: parent.is_none().then(|| parsed.entry.clone()),
            select,
            destination: parsed.destination.clone(),
            parent,
            fields,
            primary_key,
            foreign_key: None,
        });
    }

    wire_fanouts(&mut tables)?;
    wire_foreign_keys(&mut tables, options);
    check_columns(&tables)?;

    Ok(MappingSpec { tables })
}

/// Distinct first path segments in order of first appearance: the SELECT
/// column list of a body-style root.
fn body_select_columns(rules: &[RawRule]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for rule in rules {
        let first = &rule.path[0].key;
        if !columns.iter().any(|c| c == first) {
            columns.push(first.clone());
        }
    }
    columns
}

fn wire_fanouts(tables: &mut [TableSpec]) -> Result<()> {
    let mut bound = vec![false; tables.len()];

    for owner in 0..tables.len() {
        let mut bindings = Vec::new();
        for (rule_idx, rule) in tables[owner].fields.iter().enumerate() {
            if let FieldRule::Fanout { path, source, .. } = rule {
                let child_entry = format!(
                    "{}.{}",
                    tables[owner].entry,
                    path.iter().map(|s| s.key.as_str()).collect::<Vec<_>>().join(".")
                );
                let child = tables
                    .iter()
                    .position(|t| t.entry == child_entry)
                    .ok_or_else(|| {
                        EngineError::Resolution(format!(
                            "fanout rule `{source}` in `{}` has no child table `{child_entry}`",
                            tables[owner].entry
                        ))
                    })?;
                if tables[child].parent != Some(owner) {
                    return Err(EngineError::Resolution(format!(
                        "child table `{child_entry}` is not declared under `{}`",
                        tables[owner].entry
                    )));
                }
                bound[child] = true;
                bindings.push((rule_idx, child));
            }
        }
        for (rule_idx, child) in bindings {
            if let FieldRule::Fanout { child: slot, .. } = &mut tables[owner].fields[rule_idx] {
                *slot = child;
            }
        }
    }

    for (idx, table) in tables.iter().enumerate() {
        if !table.is_root() && !bound[idx] {
            return Err(EngineError::Resolution(format!(
                "table `{}` is declared but nothing fans out into it",
                table.entry
            )));
        }
    }
    Ok(())
}

fn wire_foreign_keys(tables: &mut [TableSpec], options: &CompileOptions) {
    for idx in 0..tables.len() {
        if let Some(parent) = tables[idx].parent {
            let parent_key = tables[parent].primary_key_column();
            let name = format!(
                "{}{}{}",
                tables[parent].short_destination(),
                options.delimiter,
                parent_key.name
            );
            // Foreign-key type mirrors the parent's primary-key type.
            tables[idx].foreign_key = Some(ColumnDef {
                name,
                ty: parent_key.ty,
            });
        }
    }
}

fn check_columns(tables: &[TableSpec]) -> Result<()> {
    for table in tables {
        let columns = table.insert_columns();
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(EngineError::Resolution(format!(
                    "duplicate destination column `{}` in `{}`",
                    column.name, table.destination
                )));
            }
        }
    }
    Ok(())
}

fn yaml_str(value: &Yaml, what: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::Parse(format!("{what} must be a string, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::model::{FieldRule, KeyRule, SelectPlan};

    const BODY_MAPPING: &str = r#"
public.orders:
  staging.orders:
    id*: { order_id: bigint }
    state: { state: varchar }
    details**.reference: { reference: varchar }
    client__name: { client_name: varchar }
    details**.items:
public.orders.details.items:
  staging.order_items:
    x: { x: int }
"#;

    #[test]
    fn test_body_style_compiles() {
        let spec = compile_mapping(BODY_MAPPING, &CompileOptions::default()).unwrap();
        assert_eq!(spec.tables.len(), 2);

        let root = &spec.tables[0];
        assert!(root.is_root());
        assert_eq!(root.destination, "staging.orders");
        assert_eq!(root.source.as_deref(), Some("public.orders"));
        assert!(matches!(root.primary_key, KeyRule::Explicit { rule: 0 }));

        // First segments, deduplicated, declaration order.
        match root.select.as_ref().unwrap() {
            SelectPlan::Body { columns } => {
                assert_eq!(columns, &["id", "state", "details", "client"]);
            }
            other => panic!("expected body plan, got {other:?}"),
        }

        let child = &spec.tables[1];
        assert_eq!(child.parent, Some(0));
        assert_eq!(child.foreign_key.as_ref().unwrap().name, "orders__order_id");
        assert_eq!(child.foreign_key.as_ref().unwrap().ty, "bigint");
        // Surrogate key since no `*` rule.
        assert!(matches!(child.primary_key, KeyRule::Surrogate { .. }));
    }

    #[test]
    fn test_markers_compile_to_typed_rules() {
        let spec = compile_mapping(BODY_MAPPING, &CompileOptions::default()).unwrap();
        let root = &spec.tables[0];

        match &root.fields[2] {
            FieldRule::Scalar { path, column, .. } => {
                assert_eq!(path.len(), 2);
                assert_eq!(path[0].key, "details");
                assert!(path[0].unpack);
                assert_eq!(path[1].key, "reference");
                assert!(!path[1].unpack);
                assert_eq!(column.name, "reference");
            }
            other => panic!("expected scalar rule, got {other:?}"),
        }

        // `__` flattens: two segments, one destination column.
        match &root.fields[3] {
            FieldRule::Scalar { path, column, .. } => {
                assert_eq!(path.len(), 2);
                assert_eq!(path[0].key, "client");
                assert_eq!(path[1].key, "name");
                assert_eq!(column.name, "client_name");
            }
            other => panic!("expected scalar rule, got {other:?}"),
        }

        match &root.fields[4] {
            FieldRule::Fanout { child, .. } => assert_eq!(*child, 1),
            other => panic!("expected fanout rule, got {other:?}"),
        }
    }

    #[test]
    fn test_header_style_compiles() {
        let mapping = r#"
postgres.orders[state + dt_created + order_details**]:
  staging.orders:
    state: { state: varchar }
    client__id: { client_id: varchar }
"#;
        let spec = compile_mapping(mapping, &CompileOptions::default()).unwrap();
        let root = &spec.tables[0];
        assert_eq!(root.source.as_deref(), Some("postgres.orders"));
        match root.select.as_ref().unwrap() {
            SelectPlan::Header { fields } => {
                assert_eq!(fields.len(), 3);
                assert!(!fields[0].unpack);
                assert_eq!(fields[2].name, "order_details");
                assert!(fields[2].unpack);
            }
            other => panic!("expected header plan, got {other:?}"),
        }
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let a = compile_mapping(BODY_MAPPING, &CompileOptions::default()).unwrap();
        let b = compile_mapping(BODY_MAPPING, &CompileOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_table_identifier() {
        let mapping = "bad ident!:\n  dest:\n    a: { a: int }\n";
        let err = compile_mapping(mapping, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("malformed table identifier"));
    }

    #[test]
    fn test_fanout_without_child_declaration() {
        let mapping = r#"
public.orders:
  staging.orders:
    id*: { order_id: bigint }
    items:
"#;
        let err = compile_mapping(mapping, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no child table"));
    }

    #[test]
    fn test_orphan_child_declaration() {
        let mapping = r#"
public.orders:
  staging.orders:
    id*: { order_id: bigint }
public.orders.items:
  staging.order_items:
    x: { x: int }
"#;
        let err = compile_mapping(mapping, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("nothing fans out"));
    }

    #[test]
    fn test_duplicate_destination_columns() {
        let mapping = r#"
public.orders:
  staging.orders:
    a: { same: int }
    b: { same: int }
"#;
        let err = compile_mapping(mapping, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("duplicate destination column"));
    }

    #[test]
    fn test_double_primary_key_rejected() {
        let mapping = r#"
public.orders:
  staging.orders:
    a*: { a: int }
    b*: { b: int }
"#;
        let err = compile_mapping(mapping, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("more than one primary key"));
    }

    #[test]
    fn test_unpacked_primary_key_marker() {
        // `***` = unpack the segment, and its resolved value is the key.
        let mapping = r#"
public.events:
  staging.events:
    payload***: { payload: varchar }
"#;
        let spec = compile_mapping(mapping, &CompileOptions::default()).unwrap();
        let root = &spec.tables[0];
        assert!(matches!(root.primary_key, KeyRule::Explicit { rule: 0 }));
        match &root.fields[0] {
            FieldRule::Scalar { path, .. } => assert!(path[0].unpack),
            other => panic!("expected scalar rule, got {other:?}"),
        }
    }

    #[test]
    fn test_surrogate_key_options() {
        let options = CompileOptions {
            surrogate_key_name: "row_id".into(),
            surrogate_key_type: "UInt64".into(),
            delimiter: "__".into(),
        };
        let mapping = r#"
public.orders:
  staging.orders:
    state: { state: varchar }
    items:
public.orders.items:
  staging.order_items:
    x: { x: int }
"#;
        let spec = compile_mapping(mapping, &options).unwrap();
        let pk = spec.tables[0].primary_key_column();
        assert_eq!(pk.name, "row_id");
        assert_eq!(pk.ty, "UInt64");
        let fk = spec.tables[1].foreign_key.as_ref().unwrap();
        assert_eq!(fk.name, "orders__row_id");
        assert_eq!(fk.ty, "UInt64");
    }
}
