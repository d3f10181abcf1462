//! Declarative mapping: grammar parsing and the compiled mapping model.
//!
//! A mapping is compiled once per run from YAML text into an immutable
//! forest of table specs; the normalizer and the pipeline only ever see the
//! compiled form, never the marker characters of the grammar.

pub mod model;
pub mod parser;

pub use model::{
    ColumnDef, CompileOptions, FieldRule, HeaderField, KeyRule, MappingSpec, Segment, SelectPlan,
    TableSpec,
};
pub use parser::compile_mapping;
