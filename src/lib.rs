//! # Crucible - JSON-to-relational normalization engine
//!
//! Crucible ingests rows whose columns hold JSON (or JSON-as-text)
//! documents and expands them into normalized relational tables, driven by
//! a declarative YAML mapping.
//!
//! ## Modules
//!
//! - **mapping**: compile mapping text into an immutable table forest
//! - **normalize**: snowflake expansion of documents with key generation
//! - **schema**: destination DDL derivation
//! - **sql**: placeholder template engine
//! - **pipeline**: paginated extract-load loop over pluggable collaborators
//!
//! ## Quick Start
//!
//! ```rust
//! use crucible::mapping::{compile_mapping, CompileOptions};
//! use crucible::normalize::{CounterKeys, Normalizer, NullKeyPolicy};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), crucible::EngineError> {
//! let mapping = compile_mapping(
//!     r#"
//! public.users:
//!   staging.users:
//!     id*: { user_id: bigint }
//!     posts:
//! public.users.posts:
//!   staging.user_posts:
//!     title: { title: varchar }
//! "#,
//!     &CompileOptions::default(),
//! )?;
//!
//! let mut normalizer =
//!     Normalizer::new(&mapping, Box::new(CounterKeys::new()), NullKeyPolicy::Abort);
//! let rows = normalizer.expand(
//!     0,
//!     &json!({
//!         "id": 1,
//!         "posts": [{"title": "hello"}, {"title": "again"}]
//!     }),
//! )?;
//!
//! // rows[0] = users row keyed 1, rows[1..] = posts rows carrying key 1
//! assert_eq!(rows.len(), 3);
//! assert_eq!(rows[1].parent_key, Some(json!(1)));
//! # Ok(())
//! # }
//! ```
//!
//! Running against real stores goes through [`pipeline::Pipeline`], which
//! drives pagination, preprocessing, normalization and batched loading over
//! caller-supplied [`pipeline::Source`] / [`pipeline::Destination`]
//! collaborators.

pub mod error;
pub mod mapping;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod sql;
pub mod value;

// Re-export commonly used types for convenience
pub use error::EngineError;
pub use mapping::{compile_mapping, CompileOptions, MappingSpec, TableSpec};
pub use normalize::{NormalizedRow, Normalizer, NullKeyPolicy};
pub use pipeline::{
    Destination, KeyStrategy, Pipeline, PipelineConfig, RunReport, Source, WatermarkStore,
};
pub use schema::RefreshMode;
pub use sql::SqlTemplates;
pub use value::Document;
