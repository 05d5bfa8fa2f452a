//! SQLite gateway.
//!
//! Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` on the owned
//! connection, so DDL in a migration script is rolled back along with
//! everything else.
//!
//! The command timeout is enforced inside SQLite with a progress handler
//! that interrupts the running statement once the deadline passes, so a
//! timed-out statement leaves no effect behind.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{MigrateError, MigrationRecord, PersistenceGateway, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tracing::debug;

use super::{connection_error, expect_one, live, quote_identifier};

/// Virtual machine instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;
use crate::target::Target;

/// Bookkeeping gateway over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteGateway {
    conn: Option<SqliteConnection>,
    table: String,
    in_transaction: bool,
}

impl SqliteGateway {
    /// Opens the database, creating the file if it does not exist yet.
    pub async fn connect(target: &Target, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(target.url())
            .map_err(|e| connection_error(target, e))?
            .create_if_missing(true);
        let conn = options
            .connect()
            .await
            .map_err(|e| connection_error(target, e))?;
        debug!(database = %target.display_name(), "Connected to SQLite");
        Ok(Self::new(conn, table))
    }

    /// Wraps an already open connection.
    pub fn new(conn: SqliteConnection, table: impl Into<String>) -> Self {
        Self {
            conn: Some(conn),
            table: table.into(),
            in_transaction: false,
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE {table} (\n  \
             \"Id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
             \"Filename\" TEXT NOT NULL,\n  \
             \"Fingerprint\" TEXT NOT NULL,\n  \
             \"ExecutedAtUtc\" TEXT NOT NULL,\n  \
             \"DurationMs\" INTEGER NOT NULL,\n  \
             CONSTRAINT {filename_key} UNIQUE (\"Filename\"),\n  \
             CONSTRAINT {fingerprint_key} UNIQUE (\"Fingerprint\")\n)",
            table = quote_identifier(&self.table),
            filename_key = quote_identifier(&format!("UX_{}_Filename", self.table)),
            fingerprint_key = quote_identifier(&format!("UX_{}_Fingerprint", self.table)),
        )
    }

    async fn control(&mut self, statement: &str) -> Result<()> {
        live(&mut self.conn)?
            .execute(sqlx::raw_sql(statement))
            .await
            .map_err(MigrateError::database)?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    async fn table_exists(&mut self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(&self.table)
        .fetch_one(live(&mut self.conn)?)
        .await
        .map_err(MigrateError::database)?;
        Ok(count > 0)
    }

    async fn create_table(&mut self) -> Result<()> {
        let sql = self.create_table_sql();
        live(&mut self.conn)?
            .execute(sqlx::raw_sql(&sql))
            .await
            .map_err(MigrateError::database)?;
        Ok(())
    }

    async fn load_records(&mut self) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT \"Filename\", \"Fingerprint\", \"ExecutedAtUtc\", \"DurationMs\" \
             FROM {} ORDER BY \"ExecutedAtUtc\", \"Id\"",
            quote_identifier(&self.table)
        );
        let rows: Vec<(String, String, DateTime<Utc>, i64)> = sqlx::query_as(&sql)
            .fetch_all(live(&mut self.conn)?)
            .await
            .map_err(MigrateError::database)?;

        Ok(rows
            .into_iter()
            .map(|(filename, fingerprint, executed_at, duration_ms)| {
                MigrationRecord::new(filename, fingerprint, executed_at, duration_ms)
            })
            .collect())
    }

    async fn execute(&mut self, batch: &str, timeout: Duration) -> Result<u64> {
        let conn = live(&mut self.conn)?;
        let deadline = Instant::now() + timeout;
        {
            let mut handle = conn.lock_handle().await.map_err(MigrateError::database)?;
            handle.set_progress_handler(PROGRESS_INTERVAL, move || Instant::now() < deadline);
        }

        let result = conn.execute(sqlx::raw_sql(batch)).await;

        {
            let mut handle = conn.lock_handle().await.map_err(MigrateError::database)?;
            handle.remove_progress_handler();
        }

        match result {
            Ok(done) => Ok(done.rows_affected()),
            // The progress handler interrupted the statement.
            Err(_) if Instant::now() >= deadline => Err(MigrateError::Timeout(timeout)),
            Err(err) => Err(MigrateError::database(err)),
        }
    }

    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (\"Filename\", \"Fingerprint\", \"ExecutedAtUtc\", \"DurationMs\") \
             VALUES (?1, ?2, ?3, ?4)",
            quote_identifier(&self.table)
        );
        sqlx::query(&sql)
            .bind(&record.filename)
            .bind(&record.fingerprint)
            .bind(record.executed_at)
            .bind(record.duration_ms)
            .execute(live(&mut self.conn)?)
            .await
            .map_err(MigrateError::database)?;
        Ok(())
    }

    async fn update_fingerprint(&mut self, record: &MigrationRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET \"Fingerprint\" = ?1, \"ExecutedAtUtc\" = ?2, \"DurationMs\" = ?3 \
             WHERE \"Filename\" = ?4",
            quote_identifier(&self.table)
        );
        let result = sqlx::query(&sql)
            .bind(&record.fingerprint)
            .bind(record.executed_at)
            .bind(record.duration_ms)
            .bind(&record.filename)
            .execute(live(&mut self.conn)?)
            .await
            .map_err(MigrateError::database)?;
        expect_one("update fingerprint", &record.filename, result.rows_affected())
    }

    async fn rename_record(&mut self, fingerprint: &str, new_filename: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET \"Filename\" = ?1 WHERE \"Fingerprint\" = ?2",
            quote_identifier(&self.table)
        );
        let result = sqlx::query(&sql)
            .bind(new_filename)
            .bind(fingerprint)
            .execute(live(&mut self.conn)?)
            .await
            .map_err(MigrateError::database)?;
        expect_one("rename", fingerprint, result.rows_affected())
    }

    async fn begin(&mut self) -> Result<()> {
        self.control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.control("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.control("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<()> {
        if self.in_transaction {
            self.rollback().await?;
        }
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(MigrateError::database)?;
        }
        Ok(())
    }
}
