//! Run orchestration: schema init, extraction, normalization and loading
//! for every root table of a compiled mapping.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::mapping::model::MappingSpec;
use crate::normalize::Normalizer;
use crate::pipeline::batcher::LoadBatcher;
use crate::pipeline::pump::{row_to_document, ExtractionPump, PumpOptions};
use crate::pipeline::{
    with_retries, Destination, PipelineConfig, Preprocessor, Source, WatermarkStore,
};
use crate::schema::{self, RefreshMode};
use crate::sql;
use crate::value::{scalar_cmp, sql_literal};

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Rows loaded per destination table.
    pub rows_loaded: HashMap<String, u64>,
    /// Rows dropped under [`crate::normalize::NullKeyPolicy::Skip`].
    pub rows_skipped: u64,
    /// Terminal watermark, handed to the store when one is configured.
    pub watermark: Option<Value>,
}

/// The extract-load pipeline for one mapping. Owns its collaborators; roots
/// are processed sequentially, each with its own pump and batcher.
pub struct Pipeline<S: Source, D: Destination> {
    source: S,
    destination: D,
    config: PipelineConfig,
    preprocess: Option<Preprocessor>,
    watermarks: Option<Box<dyn WatermarkStore>>,
}

impl<S: Source, D: Destination> Pipeline<S, D> {
    pub fn new(source: S, destination: D, config: PipelineConfig) -> Self {
        Pipeline {
            source,
            destination,
            config,
            preprocess: None,
            watermarks: None,
        }
    }

    /// Install the per-row preprocessing hook.
    pub fn with_preprocessor(mut self, hook: Preprocessor) -> Self {
        self.preprocess = Some(hook);
        self
    }

    /// Install watermark persistence for incremental runs.
    pub fn with_watermark_store(mut self, store: Box<dyn WatermarkStore>) -> Self {
        self.watermarks = Some(store);
        self
    }

    /// Tear the pipeline apart, handing back its collaborators.
    pub fn into_parts(self) -> (S, D) {
        (self.source, self.destination)
    }

    /// Execute the whole mapping: every root table, in declaration order.
    /// Any root's extraction failure fails the run.
    pub fn run(&mut self, mapping: &MappingSpec) -> Result<RunReport> {
        let mut bindings = self.config.bindings.clone();
        let stored_watermark = if self.config.incremental {
            match self.watermarks.as_mut() {
                Some(store) => store.get().map_err(EngineError::Watermark)?,
                None => None,
            }
        } else {
            None
        };
        if let Some(watermark) = &stored_watermark {
            bindings.insert("watermark".to_string(), sql_literal(watermark));
        }

        let mut report = RunReport {
            watermark: stored_watermark,
            ..RunReport::default()
        };

        for root in mapping.roots() {
            self.run_root(mapping, root, &bindings, &mut report)?;
        }

        if let (Some(store), Some(watermark)) = (self.watermarks.as_mut(), &report.watermark) {
            if self.config.incremental {
                store.set(watermark).map_err(EngineError::Watermark)?;
            }
        }

        Ok(report)
    }

    fn run_root(
        &mut self,
        mapping: &MappingSpec,
        root: usize,
        bindings: &HashMap<String, String>,
        report: &mut RunReport,
    ) -> Result<()> {
        let members = mapping.forest(root);
        let root_spec = &mapping.tables[root];
        info!("processing root table `{}`", root_spec.entry);

        self.initialize_tables(mapping, &members)?;

        let mut normalizer = Normalizer::new(
            mapping,
            self.config.key_strategy.generator(),
            self.config.null_key_policy,
        );
        if self.config.incremental {
            self.seed_key_sequences(mapping, &members, &mut normalizer);
        }

        let plan = root_spec
            .select
            .as_ref()
            .expect("root table carries a select plan");
        let source_table = root_spec.source.as_deref().unwrap_or(&root_spec.entry);
        let select_fields = plan.select_columns().join(", ");
        let select_params = [("table", source_table), ("fields", select_fields.as_str())];
        let count_sql = sql::bind(
            &sql::render(&self.config.templates.select_count, &select_params),
            bindings,
        );
        let select_sql = sql::bind(
            &sql::render(&self.config.templates.select_all, &select_params),
            bindings,
        );

        let mut pump = ExtractionPump::start(
            &mut self.source,
            source_table,
            &count_sql,
            select_sql,
            PumpOptions {
                page_size: self.config.page_size,
                retries: self.config.retries,
                backoff: self.config.retry_backoff,
                watermark_column: self.config.watermark_column.clone(),
            },
        )?;

        let mut batcher = LoadBatcher::new(
            mapping,
            root,
            &self.config.templates,
            self.config.commit_every,
            self.config.retries,
            self.config.retry_backoff,
        );

        loop {
            if let Some(cancel) = &self.config.cancel {
                if cancel.load(AtomicOrdering::Relaxed) {
                    return Err(EngineError::Cancelled);
                }
            }
            let Some(rows) = pump.next_page()? else {
                break;
            };
            for row in rows {
                let document = row_to_document(source_table, row, plan)?;
                let documents = match &self.preprocess {
                    Some(hook) => {
                        hook(document).map_err(|source| EngineError::Preprocessing {
                            table: source_table.to_string(),
                            source,
                        })?
                    }
                    None => vec![document],
                };
                for document in documents {
                    let value = document.into_value();
                    for normalized in normalizer.expand(root, &value)? {
                        batcher.push(&mut self.destination, normalized)?;
                    }
                }
            }
        }

        let high_watermark = pump.high_watermark().cloned();
        batcher.flush_all(&mut self.destination)?;

        for (table, count) in batcher.loaded() {
            *report.rows_loaded.entry(table).or_insert(0) += count;
        }
        report.rows_skipped += normalizer.skipped();
        if let Some(high) = high_watermark {
            let advanced = match &report.watermark {
                Some(current) => scalar_cmp(&high, current) == Ordering::Greater,
                None => true,
            };
            if advanced {
                report.watermark = Some(high);
            }
        }
        Ok(())
    }

    /// Create (full refresh: drop and recreate) the forest's tables.
    fn initialize_tables(&mut self, mapping: &MappingSpec, members: &[usize]) -> Result<()> {
        let mode = if self.config.incremental {
            RefreshMode::Incremental
        } else {
            RefreshMode::Full
        };
        for &member in members {
            let table = &mapping.tables[member];
            for statement in schema::table_statements(table, mode, &self.config.templates) {
                let destination = &mut self.destination;
                with_retries(
                    self.config.retries,
                    self.config.retry_backoff,
                    &table.destination,
                    || destination.execute(&statement),
                )
                .map_err(|(attempts, source)| EngineError::Load {
                    table: table.destination.clone(),
                    attempts,
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Continue each table's surrogate sequence past the destination's
    /// current maximum. A table that does not exist yet starts at zero.
    fn seed_key_sequences(
        &mut self,
        mapping: &MappingSpec,
        members: &[usize],
        normalizer: &mut Normalizer<'_>,
    ) {
        for &member in members {
            let table = &mapping.tables[member];
            let params = schema::table_params(table);
            let params: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let statement = sql::render(&self.config.templates.select_max, &params);
            match self.destination.query_scalar(&statement) {
                Ok(Some(Value::Number(n))) => {
                    if let Some(max) = n.as_u64() {
                        normalizer.seed_key(&table.destination, max);
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        "`{}` has no readable key sequence yet: {error:#}",
                        table.destination
                    );
                }
            }
        }
    }
}
