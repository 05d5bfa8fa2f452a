//! In-memory gateway for executor tests.
//!
//! Transactions are modelled with a snapshot taken at `begin` and restored at
//! `rollback`; statements outside a transaction apply immediately.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MigrateError, Result};
use crate::gateway::PersistenceGateway;
use crate::history::MigrationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateTable,
    Execute(String),
    Insert(String),
    Update(String),
    Rename(String),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct State {
    table: Option<Vec<MigrationRecord>>,
    batches: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: State,
    snapshot: Option<State>,
    fail_on: Option<String>,
    ops: Vec<Op>,
    closed: bool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an existing table holding `rows` as-is. Unlike
    /// `insert_record`, no uniqueness is enforced, so this can model a table
    /// written by an older tool.
    pub fn with_rows(rows: Vec<MigrationRecord>) -> Self {
        Self {
            state: State {
                table: Some(rows),
                batches: Vec::new(),
            },
            ..Self::default()
        }
    }

    /// Any batch containing `needle` fails.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn table_created(&self) -> bool {
        self.committed().table.is_some()
    }

    pub fn committed_records(&self) -> Vec<MigrationRecord> {
        self.committed().table.clone().unwrap_or_default()
    }

    pub fn committed_batches(&self) -> Vec<String> {
        self.committed().batches.clone()
    }

    fn committed(&self) -> &State {
        self.snapshot.as_ref().unwrap_or(&self.state)
    }

    fn rows(&mut self) -> Result<&mut Vec<MigrationRecord>> {
        self.state
            .table
            .as_mut()
            .ok_or_else(|| failure("no such table: Migrations"))
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(MigrateError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

fn failure(message: &str) -> MigrateError {
    MigrateError::database(std::io::Error::other(message.to_string()))
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    fn dialect(&self) -> &'static str {
        "memory"
    }

    async fn table_exists(&mut self) -> Result<bool> {
        self.check_open()?;
        Ok(self.state.table.is_some())
    }

    async fn create_table(&mut self) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::CreateTable);
        self.state.table = Some(Vec::new());
        Ok(())
    }

    async fn load_records(&mut self) -> Result<Vec<MigrationRecord>> {
        self.check_open()?;
        let mut rows = self.rows()?.clone();
        rows.sort_by_key(|r| r.executed_at);
        Ok(rows)
    }

    async fn execute(&mut self, batch: &str, _timeout: Duration) -> Result<u64> {
        self.check_open()?;
        self.ops.push(Op::Execute(batch.to_string()));
        if let Some(needle) = &self.fail_on {
            if batch.contains(needle.as_str()) {
                return Err(failure(&format!("batch failed: {batch}")));
            }
        }
        self.state.batches.push(batch.to_string());
        Ok(1)
    }

    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::Insert(record.filename.clone()));
        let rows = self.rows()?;
        if rows.iter().any(|r| r.filename == record.filename) {
            return Err(failure("UNIQUE constraint failed: Filename"));
        }
        if rows.iter().any(|r| r.fingerprint == record.fingerprint) {
            return Err(failure("UNIQUE constraint failed: Fingerprint"));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn update_fingerprint(&mut self, record: &MigrationRecord) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::Update(record.filename.clone()));
        let rows = self.rows()?;
        let matched: Vec<&mut MigrationRecord> = rows
            .iter_mut()
            .filter(|r| r.filename == record.filename)
            .collect();
        if matched.len() != 1 {
            return Err(MigrateError::Bookkeeping {
                operation: "update fingerprint",
                key: record.filename.clone(),
                affected: matched.len() as u64,
            });
        }
        for row in matched {
            row.fingerprint = record.fingerprint.clone();
            row.executed_at = record.executed_at;
            row.duration_ms = record.duration_ms;
        }
        Ok(())
    }

    async fn rename_record(&mut self, fingerprint: &str, new_filename: &str) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::Rename(new_filename.to_string()));
        let rows = self.rows()?;
        let matched: Vec<&mut MigrationRecord> = rows
            .iter_mut()
            .filter(|r| r.fingerprint == fingerprint)
            .collect();
        if matched.len() != 1 {
            return Err(MigrateError::Bookkeeping {
                operation: "rename",
                key: fingerprint.to_string(),
                affected: matched.len() as u64,
            });
        }
        for row in matched {
            row.filename = new_filename.to_string();
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        if self.snapshot.is_some() {
            return Err(failure("cannot start a transaction within a transaction"));
        }
        self.ops.push(Op::Begin);
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::Commit);
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| failure("cannot commit - no transaction is active"))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.ops.push(Op::Rollback);
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| failure("cannot rollback - no transaction is active"))?;
        self.state = snapshot;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let mut gateway = MemoryGateway::new();
        gateway.create_table().await.unwrap();
        gateway.begin().await.unwrap();
        gateway
            .insert_record(&MigrationRecord::new("a.sql", "aaa", Utc::now(), 1))
            .await
            .unwrap();
        assert!(gateway.committed_records().is_empty());
        gateway.rollback().await.unwrap();
        assert!(gateway.committed_records().is_empty());
        assert!(!gateway.in_transaction());
    }

    #[tokio::test]
    async fn test_update_requires_exactly_one_row() {
        let mut gateway = MemoryGateway::new();
        gateway.create_table().await.unwrap();
        let result = gateway
            .update_fingerprint(&MigrationRecord::new("a.sql", "aaa", Utc::now(), 1))
            .await;
        assert!(matches!(
            result,
            Err(MigrateError::Bookkeeping { affected: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_gateway_rejects_calls() {
        let mut gateway = MemoryGateway::new();
        gateway.close().await.unwrap();
        assert!(matches!(
            gateway.table_exists().await,
            Err(MigrateError::ConnectionClosed)
        ));
    }
}
