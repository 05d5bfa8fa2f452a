//! PostgreSQL gateway.
//!
//! Each batch runs under a server-side `statement_timeout`, so a batch that
//! overruns the command timeout is cancelled by the server itself.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{MigrateError, MigrationRecord, PersistenceGateway, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tracing::debug;

use super::{connection_error, expect_one, live, quote_identifier};

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";
use crate::target::Target;

/// Bookkeeping gateway over a single PostgreSQL connection.
///
/// The table is looked up and created in the connection's current schema.
#[derive(Debug)]
pub struct PgGateway {
    conn: Option<PgConnection>,
    table: String,
    in_transaction: bool,
}

impl PgGateway {
    /// Connects to the server named by `target`.
    pub async fn connect(target: &Target, table: &str) -> Result<Self> {
        let options =
            PgConnectOptions::from_str(target.url()).map_err(|e| connection_error(target, e))?;
        let conn = options
            .connect()
            .await
            .map_err(|e| connection_error(target, e))?;
        debug!(database = %target.display_name(), "Connected to PostgreSQL");
        Ok(Self::new(conn, table))
    }

    /// Wraps an already open connection.
    pub fn new(conn: PgConnection, table: impl Into<String>) -> Self {
        Self {
            conn: Some(conn),
            table: table.into(),
            in_transaction: false,
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE {table} (\n  \
             \"Id\" BIGSERIAL PRIMARY KEY,\n  \
             \"Filename\" TEXT NOT NULL,\n  \
             \"Fingerprint\" TEXT NOT NULL,\n  \
             \"ExecutedAtUtc\" TIMESTAMPTZ NOT NULL,\n  \
             \"DurationMs\" BIGINT NOT NULL,\n  \
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
impl PersistenceGateway for PgGateway {
    fn dialect(&self) -> &'static str {
        "postgres"
    }

    async fn table_exists(&mut self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(&self.table)
        .fetch_one(live(&mut self.conn)?)
        .await
        .map_err(MigrateError::database)?;
        Ok(exists)
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
        let limit = format!("SET statement_timeout = {}", timeout.as_millis());
        conn.execute(sqlx::raw_sql(&limit))
            .await
            .map_err(MigrateError::database)?;

        match conn.execute(sqlx::raw_sql(batch)).await {
            Ok(done) => Ok(done.rows_affected()),
            Err(err) if is_query_canceled(&err) => Err(MigrateError::Timeout(timeout)),
            Err(err) => Err(MigrateError::database(err)),
        }
    }

    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (\"Filename\", \"Fingerprint\", \"ExecutedAtUtc\", \"DurationMs\") \
             VALUES ($1, $2, $3, $4)",
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
            "UPDATE {} SET \"Fingerprint\" = $1, \"ExecutedAtUtc\" = $2, \"DurationMs\" = $3 \
             WHERE \"Filename\" = $4",
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
            "UPDATE {} SET \"Filename\" = $1 WHERE \"Fingerprint\" = $2",
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

fn is_query_canceled(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == QUERY_CANCELED)
}
