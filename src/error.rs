use thiserror::Error;

/// Errors surfaced by the normalization engine.
///
/// Parse and resolution failures happen before any I/O. Extraction, load and
/// preprocessing failures carry the table they happened in plus the
/// underlying collaborator error for diagnosis.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed mapping text (invalid YAML, bad identifiers, bad markers).
    #[error("mapping parse error: {0}")]
    Parse(String),

    /// Structurally invalid mapping (e.g. a fanout rule without a child
    /// table, or a child table nothing fans out into).
    #[error("mapping resolution error: {0}")]
    Resolution(String),

    /// A single source row could not be normalized.
    #[error("row error in `{table}`: {detail}")]
    Row { table: String, detail: String },

    /// Source count/fetch failed and retries were exhausted.
    #[error("extraction failed for `{table}` after {attempts} attempts")]
    Extraction {
        table: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Destination execute failed and retries were exhausted.
    #[error("load failed for `{table}` after {attempts} attempts")]
    Load {
        table: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The injected preprocessing hook failed. Never retried.
    #[error("preprocessing hook failed for `{table}`")]
    Preprocessing {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Watermark store read/write failed.
    #[error("watermark store failed")]
    Watermark(#[source] anyhow::Error),

    /// The run was cancelled between pages.
    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
