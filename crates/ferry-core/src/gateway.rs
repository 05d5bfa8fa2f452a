//! The database seam.
//!
//! The engine never embeds dialect SQL; everything it needs from a database
//! goes through [`PersistenceGateway`], implemented once per database product.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::history::MigrationRecord;

/// Database session used by one migration run.
///
/// A gateway owns a single connection. Between [`begin`](Self::begin) and
/// [`commit`](Self::commit) or [`rollback`](Self::rollback), every statement
/// it issues runs inside that transaction.
#[async_trait]
pub trait PersistenceGateway: Send {
    /// Returns the dialect name.
    fn dialect(&self) -> &'static str;

    /// Whether the bookkeeping table exists.
    async fn table_exists(&mut self) -> Result<bool>;

    /// Creates the bookkeeping table.
    async fn create_table(&mut self) -> Result<()>;

    /// Loads all bookkeeping rows ordered by execution time, then id.
    async fn load_records(&mut self) -> Result<Vec<MigrationRecord>>;

    /// Executes one command batch verbatim and returns the affected row count.
    async fn execute(&mut self, batch: &str, timeout: Duration) -> Result<u64>;

    /// Inserts a bookkeeping row.
    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<()>;

    /// Replaces the fingerprint, timestamp and duration of the row for
    /// `record.filename`. Fails unless exactly one row matched.
    async fn update_fingerprint(&mut self, record: &MigrationRecord) -> Result<()>;

    /// Renames the row holding `fingerprint`. Fails unless exactly one row matched.
    async fn rename_record(&mut self, fingerprint: &str, new_filename: &str) -> Result<()>;

    /// Begins a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Rolls back any open transaction and closes the connection.
    async fn close(&mut self) -> Result<()>;
}
