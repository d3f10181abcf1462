//! Compiled mapping model: an immutable forest of table specs.

use serde::{Deserialize, Serialize};

/// One segment of a source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Object key (or array index, when it parses as an integer).
    pub key: String,
    /// Parse the value at this segment as embedded JSON text before
    /// continuing navigation (`**` marker).
    pub unpack: bool,
}

impl Segment {
    pub fn plain(key: impl Into<String>) -> Self {
        Segment {
            key: key.into(),
            unpack: false,
        }
    }

    pub fn unpacked(key: impl Into<String>) -> Self {
        Segment {
            key: key.into(),
            unpack: true,
        }
    }
}

/// A destination column: name plus its opaque, dialect-specific type token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: String,
}

/// Compiled per-field rule. Marker characters from the grammar are gone by
/// this point; the role is fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// Resolve the path and emit the value into one destination column.
    Scalar {
        path: Vec<Segment>,
        column: ColumnDef,
        /// The resolved value becomes this table's primary key (`*` marker).
        primary_key: bool,
    },
    /// Resolve the path to an array and fan each element into a child table.
    Fanout {
        path: Vec<Segment>,
        /// Raw source path as written, used for diagnostics.
        source: String,
        /// Index of the bound child table in `MappingSpec::tables`.
        child: usize,
    },
}

/// One field of a header-style source declaration (`table[a + b**]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    /// Parse this column's JSON and merge its top-level keys into the
    /// document namespace instead of keeping it as one column.
    pub unpack: bool,
}

/// How a root table's source rows become documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectPlan {
    /// Body style: select the first segment of every rule path; cells are
    /// kept raw (JSON text included) until a rule navigates into them.
    Body { columns: Vec<String> },
    /// Header style: select the declared fields; `**` fields are parsed and
    /// their top-level keys merged into the document. Declared plain columns
    /// win over merged keys, and earlier merges win over later ones.
    Header { fields: Vec<HeaderField> },
}

impl SelectPlan {
    /// Column list for the windowed SELECT, in declaration order.
    pub fn select_columns(&self) -> Vec<&str> {
        match self {
            SelectPlan::Body { columns } => columns.iter().map(String::as_str).collect(),
            SelectPlan::Header { fields } => fields.iter().map(|f| f.name.as_str()).collect(),
        }
    }
}

/// Primary-key rule for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRule {
    /// A `*`-marked scalar rule supplies the key; `rule` indexes
    /// `TableSpec::fields`.
    Explicit { rule: usize },
    /// No `*` rule: a surrogate key is generated per row and stored in a
    /// dedicated leading column.
    Surrogate { column: ColumnDef },
}

/// One destination table of the forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Source entry key as written in the mapping (root tables: the source
    /// table identifier; children: parent entry + `.` + fanout path).
    pub entry: String,
    /// Schema-qualified source table identifier. Roots only.
    pub source: Option<String>,
    /// How source rows turn into documents. Roots only.
    pub select: Option<SelectPlan>,
    /// Destination table name.
    pub destination: String,
    /// Parent table index. `None` only for roots.
    pub parent: Option<usize>,
    pub fields: Vec<FieldRule>,
    pub primary_key: KeyRule,
    /// Foreign key bound to the parent's primary key. Children only.
    pub foreign_key: Option<ColumnDef>,
}

impl TableSpec {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Short destination name without schema qualification.
    pub fn short_destination(&self) -> &str {
        self.destination.rsplit('.').next().unwrap_or(&self.destination)
    }

    /// Primary-key column name and type.
    pub fn primary_key_column(&self) -> ColumnDef {
        match &self.primary_key {
            KeyRule::Explicit { rule } => match &self.fields[*rule] {
                FieldRule::Scalar { column, .. } => column.clone(),
                // Compile guarantees the explicit key rule is a scalar.
                FieldRule::Fanout { .. } => unreachable!("explicit key bound to fanout rule"),
            },
            KeyRule::Surrogate { column } => column.clone(),
        }
    }

    /// Declared scalar columns in rule order (fanout rules emit none).
    pub fn scalar_columns(&self) -> Vec<&ColumnDef> {
        self.fields
            .iter()
            .filter_map(|rule| match rule {
                FieldRule::Scalar { column, .. } => Some(column),
                FieldRule::Fanout { .. } => None,
            })
            .collect()
    }

    /// Full destination column layout, in the order DDL and INSERT use it:
    /// foreign key first (children), then the surrogate key column (when no
    /// explicit key is declared), then the declared columns.
    pub fn insert_columns(&self) -> Vec<ColumnDef> {
        let mut columns = Vec::new();
        if let Some(fk) = &self.foreign_key {
            columns.push(fk.clone());
        }
        if let KeyRule::Surrogate { column } = &self.primary_key {
            columns.push(column.clone());
        }
        columns.extend(self.scalar_columns().into_iter().cloned());
        columns
    }
}

/// The compiled mapping: an ordered forest of table specs, parents always
/// declared before their children. Built once, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSpec {
    pub tables: Vec<TableSpec>,
}

impl MappingSpec {
    /// Indexes of root tables, in declaration order.
    pub fn roots(&self) -> Vec<usize> {
        self.tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_root())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indexes of all tables in `root`'s forest (itself included), in
    /// declaration order. Declaration order is topological: every parent
    /// precedes its children.
    pub fn forest(&self, root: usize) -> Vec<usize> {
        let mut members = vec![root];
        let mut i = 0;
        while i < members.len() {
            let current = members[i];
            for (idx, table) in self.tables.iter().enumerate() {
                if table.parent == Some(current) {
                    members.push(idx);
                }
            }
            i += 1;
        }
        members.sort_unstable();
        members
    }
}

/// Knobs fixed at compile time: surrogate key naming and the flattening
/// delimiter used to build foreign-key column names. Deserializable so
/// callers can keep them next to the mapping text; absent fields take the
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub surrogate_key_name: String,
    pub surrogate_key_type: String,
    pub delimiter: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            surrogate_key_name: "id".to_string(),
            surrogate_key_type: "bigint".to_string(),
            delimiter: "__".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_options_from_yaml_with_defaults() {
        let options: CompileOptions =
            serde_yaml::from_str("surrogate_key_name: row_id").unwrap();
        assert_eq!(options.surrogate_key_name, "row_id");
        // Unlisted fields fall back to the defaults.
        assert_eq!(options.surrogate_key_type, "bigint");
        assert_eq!(options.delimiter, "__");
    }
}
