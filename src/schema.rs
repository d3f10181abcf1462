//! Destination DDL derivation.
//!
//! Each table spec yields an ordered statement list: full-refresh mode drops
//! and recreates, incremental mode only creates if absent. Column order
//! matches the INSERT layout (foreign key, key column, declared fields) so
//! the same spec drives both DDL and loading.

use crate::mapping::model::TableSpec;
use crate::sql::{self, SqlTemplates};

/// Whether a run recreates destination tables or appends to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Drop and recreate every destination table, reload everything.
    Full,
    /// Create missing tables only, never drop.
    Incremental,
}

/// Comma-joined `name type` column definition for `{definition}`.
pub fn definition(table: &TableSpec) -> String {
    table
        .insert_columns()
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structural template parameters shared by DDL and DML for one table.
pub fn table_params(table: &TableSpec) -> Vec<(String, String)> {
    let fields = table
        .insert_columns()
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        ("table".to_string(), table.destination.clone()),
        ("fields".to_string(), fields),
        ("definition".to_string(), definition(table)),
        ("pk".to_string(), table.primary_key_column().name),
        (
            "fk".to_string(),
            table
                .foreign_key
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
        ),
    ]
}

/// The DDL statement sequence for one table, in execution order.
pub fn table_statements(
    table: &TableSpec,
    mode: RefreshMode,
    templates: &SqlTemplates,
) -> Vec<String> {
    let params = table_params(table);
    let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let mut statements = Vec::new();
    if mode == RefreshMode::Full {
        statements.push(sql::render(&templates.drop_table, &params));
    }
    for template in &templates.create_table {
        statements.push(sql::render(template, &params));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::model::CompileOptions;
    use crate::mapping::parser::compile_mapping;

    const MAPPING: &str = r#"
public.orders:
  staging.orders:
    id*: { order_id: bigint }
    state: { state: varchar }
    items:
public.orders.items:
  staging.order_items:
    x: { x: int }
"#;

    #[test]
    fn test_full_refresh_drops_then_creates() {
        let spec = compile_mapping(MAPPING, &CompileOptions::default()).unwrap();
        let statements =
            table_statements(&spec.tables[0], RefreshMode::Full, &SqlTemplates::default());

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "DROP TABLE IF EXISTS staging.orders");
        assert_eq!(
            statements[1],
            "CREATE TABLE IF NOT EXISTS staging.orders (order_id bigint, state varchar)"
        );
    }

    #[test]
    fn test_incremental_never_drops() {
        let spec = compile_mapping(MAPPING, &CompileOptions::default()).unwrap();
        let statements = table_statements(
            &spec.tables[0],
            RefreshMode::Incremental,
            &SqlTemplates::default(),
        );
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn test_child_layout_is_fk_then_pk_then_fields() {
        let spec = compile_mapping(MAPPING, &CompileOptions::default()).unwrap();
        assert_eq!(
            definition(&spec.tables[1]),
            "orders__order_id bigint, id bigint, x int"
        );
    }

    #[test]
    fn test_trailing_dialect_statement() {
        let spec = compile_mapping(MAPPING, &CompileOptions::default()).unwrap();
        let mut templates = SqlTemplates::default();
        templates
            .create_table
            .push("ALTER TABLE {table} ORDER BY {pk}".to_string());

        let statements = table_statements(&spec.tables[0], RefreshMode::Incremental, &templates);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "ALTER TABLE staging.orders ORDER BY order_id");
    }
}
