//! Per-table row buffering and batched destination inserts.
//!
//! One batcher owns the buffers of a single root table's forest. Flushes
//! always happen parent-before-child: reaching the threshold on any table
//! first force-flushes its ancestors, so a child row never lands before the
//! parent row its foreign key points at.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::mapping::model::{KeyRule, MappingSpec};
use crate::normalize::NormalizedRow;
use crate::pipeline::{with_retries, Destination};
use crate::schema::table_params;
use crate::sql::{self, SqlTemplates};

/// Buffers normalized rows for one root's table forest and flushes them as
/// templated multi-row inserts.
pub struct LoadBatcher<'a> {
    spec: &'a MappingSpec,
    /// Forest members in declaration order (topological, parents first).
    members: Vec<usize>,
    buffers: HashMap<usize, Vec<NormalizedRow>>,
    insert_templates: Vec<String>,
    commit_every: usize,
    retries: u32,
    backoff: Duration,
    loaded: HashMap<usize, u64>,
}

impl<'a> LoadBatcher<'a> {
    pub fn new(
        spec: &'a MappingSpec,
        root: usize,
        templates: &SqlTemplates,
        commit_every: usize,
        retries: u32,
        backoff: Duration,
    ) -> Self {
        let members = spec.forest(root);
        let buffers = members.iter().map(|&m| (m, Vec::new())).collect();
        LoadBatcher {
            spec,
            members,
            buffers,
            insert_templates: templates.insert_into.clone(),
            commit_every: commit_every.max(1),
            retries,
            backoff,
            loaded: HashMap::new(),
        }
    }

    /// Rows loaded so far, keyed by destination table name.
    pub fn loaded(&self) -> HashMap<String, u64> {
        self.loaded
            .iter()
            .map(|(&table, &count)| (self.spec.tables[table].destination.clone(), count))
            .collect()
    }

    /// Buffer one row; flush its table (ancestors first) at the threshold.
    pub fn push<D: Destination>(
        &mut self,
        destination: &mut D,
        row: NormalizedRow,
    ) -> Result<()> {
        let table = row.table;
        let buffer = self
            .buffers
            .get_mut(&table)
            .expect("row for a table outside this batcher's forest");
        buffer.push(row);
        if self.buffers[&table].len() >= self.commit_every {
            self.flush_with_ancestors(destination, table)?;
        }
        Ok(())
    }

    /// Flush every buffered table, parents before children.
    pub fn flush_all<D: Destination>(&mut self, destination: &mut D) -> Result<()> {
        for table in self.members.clone() {
            self.flush(destination, table)?;
        }
        Ok(())
    }

    fn flush_with_ancestors<D: Destination>(
        &mut self,
        destination: &mut D,
        table: usize,
    ) -> Result<()> {
        let mut chain = vec![table];
        let mut current = table;
        while let Some(parent) = self.spec.tables[current].parent {
            chain.push(parent);
            current = parent;
        }
        for table in chain.into_iter().rev() {
            self.flush(destination, table)?;
        }
        Ok(())
    }

    fn flush<D: Destination>(&mut self, destination: &mut D, table: usize) -> Result<()> {
        let rows = std::mem::take(self.buffers.get_mut(&table).expect("known table"));
        let spec = &self.spec.tables[table];
        if rows.is_empty() {
            debug!("`{}`: nothing to flush", spec.destination);
            return Ok(());
        }

        let tuples: Vec<Vec<Value>> = rows.iter().map(|row| tuple_for(spec, row)).collect();

        let params = table_params(spec);
        let params: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        info!("`{}`: inserting {} rows", spec.destination, rows.len());
        for template in &self.insert_templates {
            let statement = sql::render(template, &params);
            with_retries(self.retries, self.backoff, &spec.destination, || {
                destination.execute_batch(&statement, tuples.clone())
            })
            .map_err(|(attempts, source)| EngineError::Load {
                table: spec.destination.clone(),
                attempts,
                source,
            })?;
        }

        *self.loaded.entry(table).or_insert(0) += rows.len() as u64;
        Ok(())
    }
}

/// Value tuple in destination column order: foreign key, surrogate key
/// (when generated), then declared columns. Explicitly keyed tables carry
/// their key inside its declared column.
fn tuple_for(spec: &crate::mapping::model::TableSpec, row: &NormalizedRow) -> Vec<Value> {
    let mut tuple = Vec::new();
    if spec.foreign_key.is_some() {
        tuple.push(row.parent_key.clone().unwrap_or(Value::Null));
    }
    if matches!(spec.primary_key, KeyRule::Surrogate { .. }) {
        tuple.push(row.key.clone());
    }
    tuple.extend(row.columns.iter().map(|(_, v)| v.clone()));
    tuple
}
