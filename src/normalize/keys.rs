//! Pluggable surrogate key generation.
//!
//! Tables without an explicit `*` rule get a generated key. The strategy is
//! isolated behind one trait so the choice never leaks into the rest of the
//! engine. Surrogate keys are stable within a run but not across runs;
//! callers that re-run for idempotent upserts should declare an explicit key.

use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Generates a surrogate primary key for one row.
pub trait KeyGenerator {
    /// Produce the key for the next row of `table` (destination name).
    /// `columns` are the row's own resolved column values, in rule order.
    fn next_key(&mut self, table: &str, columns: &[(String, Value)]) -> Value;

    /// Advance `table`'s sequence past `start`. Counter strategies use this
    /// to continue an existing sequence in incremental mode; content-hash
    /// strategies ignore it.
    fn seed(&mut self, _table: &str, _start: u64) {}
}

/// Monotonic per-table counter, starting at 1. The default strategy.
#[derive(Debug, Default)]
pub struct CounterKeys {
    counters: HashMap<String, u64>,
}

impl CounterKeys {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for CounterKeys {
    fn next_key(&mut self, table: &str, _columns: &[(String, Value)]) -> Value {
        let counter = self.counters.entry(table.to_string()).or_insert(0);
        *counter += 1;
        Value::from(*counter)
    }

    fn seed(&mut self, table: &str, start: u64) {
        let counter = self.counters.entry(table.to_string()).or_insert(0);
        *counter = (*counter).max(start);
    }
}

/// Content hash of the row's own column values. Two identical rows get the
/// same key, so fan-in duplicates collapse on upsert-capable destinations.
#[derive(Debug, Default)]
pub struct ContentHashKeys;

impl ContentHashKeys {
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for ContentHashKeys {
    fn next_key(&mut self, table: &str, columns: &[(String, Value)]) -> Value {
        let mut hasher = DefaultHasher::new();
        table.hash(&mut hasher);
        for (name, value) in columns {
            name.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
        Value::from(hasher.finish())
    }
}
