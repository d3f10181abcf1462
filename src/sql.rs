//! SQL template engine: placeholder substitution, nothing more.
//!
//! Structural placeholders (`{table}`, `{fields}`, `{definition}`,
//! `{values}`, `{pk}`, `{fk}`) are replaced literally. Caller-supplied named
//! variables use a `:name` prefix so they cannot collide with the structural
//! braces. No SQL is parsed or validated here; a bad template only surfaces
//! as an execution error at the destination.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SELECT_COUNT_QUERY: &str = "SELECT count(*) FROM {table}";
pub const SELECT_ALL_QUERY: &str = "SELECT {fields} FROM {table}";
pub const SELECT_MAX_QUERY: &str = "SELECT max({pk}) FROM {table}";
pub const DROP_TABLE_QUERY: &str = "DROP TABLE IF EXISTS {table}";
pub const CREATE_TABLE_QUERY: &str = "CREATE TABLE IF NOT EXISTS {table} ({definition})";
pub const INSERT_INTO_QUERY: &str = "INSERT INTO {table} ({fields}) VALUES {values}";

/// Matches `:name` bindings. The leading character class keeps `::type`
/// casts and anything inside identifiers untouched.
static BIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^:A-Za-z0-9_]):([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// The six overridable statement templates driving a run. `create_table`
/// and `insert_into` are sequences executed in declared order, so callers
/// can append dialect-specific trailing statements (engine, partitioning,
/// ordering key). Deserializable for file-based overrides; templates left
/// out keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlTemplates {
    pub select_count: String,
    pub select_all: String,
    pub select_max: String,
    pub drop_table: String,
    pub create_table: Vec<String>,
    pub insert_into: Vec<String>,
}

impl Default for SqlTemplates {
    fn default() -> Self {
        SqlTemplates {
            select_count: SELECT_COUNT_QUERY.to_string(),
            select_all: SELECT_ALL_QUERY.to_string(),
            select_max: SELECT_MAX_QUERY.to_string(),
            drop_table: DROP_TABLE_QUERY.to_string(),
            create_table: vec![CREATE_TABLE_QUERY.to_string()],
            insert_into: vec![INSERT_INTO_QUERY.to_string()],
        }
    }
}

/// Substitute structural `{name}` placeholders. Unknown placeholders are
/// left as-is.
pub fn render(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Substitute `:name` bindings from `vars`. Unknown names are left as-is.
pub fn bind(template: &str, vars: &HashMap<String, String>) -> String {
    BIND_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let prefix = &caps[1];
            let name = &caps[2];
            match vars.get(name) {
                Some(value) => format!("{prefix}{value}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_render() {
        let sql = render(
            SELECT_ALL_QUERY,
            &[("fields", "a, b"), ("table", "public.t")],
        );
        assert_eq!(sql, "SELECT a, b FROM public.t");
    }

    #[test]
    fn test_unknown_placeholder_left_untouched() {
        let sql = render("SELECT {mystery} FROM {table}", &[("table", "t")]);
        assert_eq!(sql, "SELECT {mystery} FROM t");
    }

    #[test]
    fn test_named_binding() {
        let mut vars = HashMap::new();
        vars.insert("watermark".to_string(), "'2024-01-01'".to_string());
        let sql = bind("SELECT * FROM t WHERE dt > :watermark", &vars);
        assert_eq!(sql, "SELECT * FROM t WHERE dt > '2024-01-01'");
    }

    #[test]
    fn test_binding_at_start_and_unknown_names() {
        let mut vars = HashMap::new();
        vars.insert("limit".to_string(), "10".to_string());
        assert_eq!(bind(":limit", &vars), "10");
        assert_eq!(bind("WHERE x > :other", &vars), "WHERE x > :other");
    }

    #[test]
    fn test_templates_from_yaml_with_defaults() {
        let yaml = r#"
select_all: "SELECT {fields} FROM {table} WHERE dt > :watermark"
insert_into:
  - "INSERT INTO {table} ({fields}) VALUES {values}"
  - "OPTIMIZE TABLE {table}"
"#;
        let templates: SqlTemplates = serde_yaml::from_str(yaml).unwrap();
        assert!(templates.select_all.ends_with(":watermark"));
        assert_eq!(templates.insert_into.len(), 2);
        // Everything unlisted keeps its default.
        assert_eq!(templates.select_count, SELECT_COUNT_QUERY);
        assert_eq!(templates.drop_table, DROP_TABLE_QUERY);
        assert_eq!(templates.create_table, vec![CREATE_TABLE_QUERY.to_string()]);
    }

    #[test]
    fn test_postgres_casts_left_alone() {
        let mut vars = HashMap::new();
        vars.insert("bigint".to_string(), "BOOM".to_string());
        let sql = bind("SELECT x::bigint FROM t", &vars);
        assert_eq!(sql, "SELECT x::bigint FROM t");
    }
}
