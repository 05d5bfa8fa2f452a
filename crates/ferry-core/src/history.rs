//! Execution history.
//!
//! A read-only snapshot of the bookkeeping table, loaded once before planning
//! and indexed by filename and by fingerprint.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Filename the script was applied under. Unique.
    pub filename: String,
    /// Fingerprint of the applied content. Unique.
    pub fingerprint: String,
    /// When the script last ran.
    pub executed_at: DateTime<Utc>,
    /// How long the script's batches took, in milliseconds.
    pub duration_ms: i64,
}

impl MigrationRecord {
    /// Creates a record for a script that just ran.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        fingerprint: impl Into<String>,
        executed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Self {
        Self {
            filename: filename.into(),
            fingerprint: fingerprint.into(),
            executed_at,
            duration_ms,
        }
    }
}

/// Previously recorded executions, in load order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    records: Vec<MigrationRecord>,
    by_filename: HashMap<String, usize>,
    by_fingerprint: HashMap<String, usize>,
}

impl ExecutionHistory {
    /// Builds the history from records ordered by execution time, then id.
    #[must_use]
    pub fn new(records: Vec<MigrationRecord>) -> Self {
        let mut by_filename = HashMap::with_capacity(records.len());
        let mut by_fingerprint = HashMap::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            by_filename.insert(record.filename.clone(), index);
            by_fingerprint.insert(record.fingerprint.clone(), index);
        }

        Self {
            records,
            by_filename,
            by_fingerprint,
        }
    }

    /// An empty history, used when the bookkeeping table does not exist yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up a record by filename.
    #[must_use]
    pub fn by_filename(&self, filename: &str) -> Option<&MigrationRecord> {
        self.by_filename.get(filename).map(|&i| &self.records[i])
    }

    /// Looks up a record by content fingerprint.
    #[must_use]
    pub fn by_fingerprint(&self, fingerprint: &str) -> Option<&MigrationRecord> {
        self.by_fingerprint.get(fingerprint).map(|&i| &self.records[i])
    }

    /// The most recently loaded record.
    #[must_use]
    pub fn last(&self) -> Option<&MigrationRecord> {
        self.records.last()
    }

    /// Number of recorded executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in load order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationRecord> {
        self.records.iter()
    }
}
