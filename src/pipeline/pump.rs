//! Paginated extraction for one root table.
//!
//! Protocol: one count query snapshots the total, then windowed selects
//! advance a fixed-size offset until the snapshot is covered. Fetched rows
//! become documents according to the root's select plan; JSON-bearing cells
//! stay raw strings until a rule unpacks them.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::mapping::model::SelectPlan;
use crate::pipeline::{with_retries, Source};
use crate::value::{scalar_cmp, Document};

/// Mutable cursor of one extraction: advances per fetch, tracks the highest
/// watermark value seen.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState {
    pub offset: u64,
    /// Total row count snapshot taken at start.
    pub total: u64,
    pub watermark: Option<Value>,
}

/// Fetch tuning carried from the pipeline config.
#[derive(Debug, Clone)]
pub struct PumpOptions {
    pub page_size: u64,
    pub retries: u32,
    pub backoff: Duration,
    pub watermark_column: Option<String>,
}

/// Restartable paginated row pump for one root table.
pub struct ExtractionPump<'a, S: Source> {
    source: &'a mut S,
    /// Source table identifier, for logs and error context.
    table: String,
    select_sql: String,
    options: PumpOptions,
    state: PaginationState,
}

impl<'a, S: Source> ExtractionPump<'a, S> {
    /// Issue the count query and position the cursor at the first page.
    pub fn start(
        source: &'a mut S,
        table: impl Into<String>,
        count_sql: &str,
        select_sql: impl Into<String>,
        options: PumpOptions,
    ) -> Result<Self> {
        let table = table.into();
        let total = with_retries(options.retries, options.backoff, &table, || {
            source.count(count_sql)
        })
        .map_err(|(attempts, source)| EngineError::Extraction {
            table: table.clone(),
            attempts,
            source,
        })?;
        info!("`{table}`: {total} rows to extract");

        Ok(ExtractionPump {
            source,
            table,
            select_sql: select_sql.into(),
            options,
            state: PaginationState {
                offset: 0,
                total,
                watermark: None,
            },
        })
    }

    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Highest watermark-column value seen across fetched rows.
    pub fn high_watermark(&self) -> Option<&Value> {
        self.state.watermark.as_ref()
    }

    /// Fetch the next page, or `None` once the count snapshot is covered.
    pub fn next_page(&mut self) -> Result<Option<Vec<Map<String, Value>>>> {
        if self.state.offset >= self.state.total {
            return Ok(None);
        }
        info!(
            "`{}`: fetching {}/{}",
            self.table, self.state.offset, self.state.total
        );

        let select_sql = &self.select_sql;
        let limit = self.options.page_size;
        let offset = self.state.offset;
        let source = &mut *self.source;
        let rows = with_retries(self.options.retries, self.options.backoff, &self.table, || {
            source.fetch(select_sql, limit, offset)
        })
        .map_err(|(attempts, source)| EngineError::Extraction {
            table: self.table.clone(),
            attempts,
            source,
        })?;

        self.state.offset += self.options.page_size;

        if let Some(column) = &self.options.watermark_column {
            for row in &rows {
                if let Some(value) = row.get(column) {
                    let higher = match &self.state.watermark {
                        Some(current) => scalar_cmp(value, current) == Ordering::Greater,
                        None => !value.is_null(),
                    };
                    if higher {
                        self.state.watermark = Some(value.clone());
                    }
                }
            }
        }

        Ok(Some(rows))
    }
}

/// Turn one fetched row into a document per the root's select plan.
///
/// Body style keeps every selected cell raw under its column name. Header
/// style merges the top-level keys of each `**` field into the document;
/// declared plain columns win over merged keys, and earlier merges win over
/// later ones.
pub fn row_to_document(
    table: &str,
    mut row: Map<String, Value>,
    plan: &SelectPlan,
) -> Result<Document> {
    let mut doc = Document::new();
    match plan {
        SelectPlan::Body { columns } => {
            for column in columns {
                let cell = row.remove(column).unwrap_or(Value::Null);
                doc.insert(column.clone(), cell);
            }
        }
        SelectPlan::Header { fields } => {
            for field in fields.iter().filter(|f| !f.unpack) {
                let cell = row.remove(&field.name).unwrap_or(Value::Null);
                doc.insert(field.name.clone(), cell);
            }
            for field in fields.iter().filter(|f| f.unpack) {
                let cell = row.remove(&field.name).unwrap_or(Value::Null);
                merge_unpacked(table, &field.name, cell, &mut doc)?;
            }
        }
    }
    Ok(doc)
}

fn merge_unpacked(table: &str, field: &str, cell: Value, doc: &mut Document) -> Result<()> {
    let parsed = match cell {
        Value::Object(map) => Value::Object(map),
        Value::String(text) => {
            serde_json::from_str(&text).map_err(|e| EngineError::Row {
                table: table.to_string(),
                detail: format!("header field `{field}` is not valid JSON: {e}"),
            })?
        }
        // Nothing mergeable in this cell.
        _ => return Ok(()),
    };
    if let Value::Object(map) = parsed {
        for (key, value) in map {
            if doc.get(&key).is_none() {
                doc.insert(key, value);
            }
        }
    }
    Ok(())
}
