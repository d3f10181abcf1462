//! Paginated extract-load pipeline.
//!
//! The pipeline owns no I/O of its own: a [`Source`] serves counts and row
//! pages, a [`Destination`] executes statements and batched inserts, and an
//! optional [`WatermarkStore`] persists incremental state between runs. All
//! collaborator calls are blocking; transient failures are retried with
//! exponential backoff up to the configured attempt count.

pub mod batcher;
pub mod pump;
pub mod runner;

pub use batcher::LoadBatcher;
pub use pump::{ExtractionPump, PaginationState};
pub use runner::{Pipeline, RunReport};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::normalize::NullKeyPolicy;
use crate::normalize::{ContentHashKeys, CounterKeys, KeyGenerator};
use crate::sql::SqlTemplates;
use crate::value::Document;

/// Source of raw rows. `fetch` applies the window itself so the engine
/// never has to know the dialect's LIMIT/OFFSET spelling.
pub trait Source {
    fn count(&mut self, sql: &str) -> anyhow::Result<u64>;
    fn fetch(
        &mut self,
        sql: &str,
        limit: u64,
        offset: u64,
    ) -> anyhow::Result<Vec<Map<String, Value>>>;
}

/// Destination statement executor.
pub trait Destination {
    fn execute(&mut self, statement: &str) -> anyhow::Result<()>;

    /// Execute `template` (its `{values}` placeholder still unsubstituted)
    /// against one tuple per buffered row. Tuples are ordered foreign key,
    /// surrogate key (when generated), then declared columns. Destinations
    /// without a parameterized batch API can render the tuples into the
    /// template with [`crate::value::render_values`].
    fn execute_batch(&mut self, template: &str, tuples: Vec<Vec<Value>>) -> anyhow::Result<()>;

    /// Fetch a single scalar, used to continue key sequences in incremental
    /// mode. Destinations that cannot query may keep the default.
    fn query_scalar(&mut self, _sql: &str) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

/// Opaque read-before/write-after watermark state, owned by the caller.
/// `get` returning `None` means "no lower bound yet": the run's select
/// templates see no `:watermark` binding, so first runs should either return
/// an initial low watermark here or use templates without the predicate.
pub trait WatermarkStore {
    fn get(&mut self) -> anyhow::Result<Option<Value>>;
    fn set(&mut self, watermark: &Value) -> anyhow::Result<()>;
}

/// Injected per-row hook, applied before normalization. May drop a document
/// (empty output), pass it through, or fan it out into several. Must be
/// side-effect-free from the engine's perspective; any failure is fatal and
/// never retried.
pub type Preprocessor = Box<dyn Fn(Document) -> anyhow::Result<Vec<Document>>>;

/// Surrogate-key strategy for tables without an explicit key rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    #[default]
    Counter,
    ContentHash,
}

impl KeyStrategy {
    pub(crate) fn generator(self) -> Box<dyn KeyGenerator> {
        match self {
            KeyStrategy::Counter => Box::new(CounterKeys::new()),
            KeyStrategy::ContentHash => Box::new(ContentHashKeys::new()),
        }
    }
}

/// Configuration surface consumed by the pipeline.
pub struct PipelineConfig {
    /// Append new rows past the stored watermark instead of full refresh.
    pub incremental: bool,
    /// Per-table buffered row count that triggers a flush.
    pub commit_every: usize,
    /// Window size of each paginated fetch.
    pub page_size: u64,
    /// Retries after the first attempt, for page fetches and flushes.
    pub retries: u32,
    /// Base backoff sleep, doubled per retry.
    pub retry_backoff: Duration,
    pub null_key_policy: NullKeyPolicy,
    pub key_strategy: KeyStrategy,
    /// Column whose maximum fetched value becomes the next watermark.
    pub watermark_column: Option<String>,
    /// Caller-supplied `:name` bindings for the count/select templates.
    pub bindings: HashMap<String, String>,
    pub templates: SqlTemplates,
    /// External abort flag, checked between pages.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            incremental: false,
            commit_every: 1000,
            page_size: 1000,
            retries: 3,
            retry_backoff: Duration::from_millis(500),
            null_key_policy: NullKeyPolicy::default(),
            key_strategy: KeyStrategy::default(),
            watermark_column: None,
            bindings: HashMap::new(),
            templates: SqlTemplates::default(),
            cancel: None,
        }
    }
}

/// Run `op` up to `retries + 1` times with exponential backoff. On
/// exhaustion, hands back the attempt count and the last error for the
/// caller to wrap with table context.
pub(crate) fn with_retries<T>(
    retries: u32,
    backoff: Duration,
    label: &str,
    mut op: impl FnMut() -> anyhow::Result<T>,
) -> std::result::Result<T, (u32, anyhow::Error)> {
    let attempts = retries + 1;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                warn!("{label}: attempt {attempt}/{attempts} failed: {error:#}");
                std::thread::sleep(backoff * 2u32.saturating_pow(attempt - 1));
            }
            Err(error) => return Err((attempts, error)),
        }
    }
    unreachable!("retry loop returns on last attempt")
}
