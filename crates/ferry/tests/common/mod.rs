#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use ferry::{RunConfig, RunReport, Target, TargetOutcome, discover, run_targets};
use ferry_core::prelude::*;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tempfile::TempDir;

/// A scratch directory holding migration scripts and SQLite databases.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        fs::create_dir(dir.path().join("migrations")).expect("failed to create migrations dir");
        Self { dir }
    }

    pub fn migrations(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    /// Writes (or overwrites) a migration script.
    pub fn write(&self, name: &str, content: &str) {
        fs::write(self.migrations().join(name), content).expect("failed to write migration");
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.migrations().join(from), self.migrations().join(to))
            .expect("failed to rename migration");
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// URL of a database file inside the workspace.
    pub fn database(&self, name: &str) -> String {
        format!("sqlite://{}", self.database_path(name).display())
    }

    pub fn target(&self, name: &str) -> Target {
        Target::new(self.database(name))
    }

    pub fn files(&self) -> Vec<MigrationFile> {
        discover(&self.migrations(), &["SP", "AUTORUN"]).expect("discovery failed")
    }

    /// Migrates one database and returns its executor result.
    pub async fn migrate(&self, db: &str, options: MigrateOptions) -> MigrationResult {
        let report = self.run(&[self.target(db)], RunConfig::new(options)).await;
        let outcome = report
            .targets
            .into_iter()
            .next()
            .expect("one target")
            .outcome;
        match outcome {
            TargetOutcome::Completed { result } => result,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    pub async fn run(&self, targets: &[Target], config: RunConfig) -> RunReport {
        run_targets(targets, &self.files(), &config).await
    }
}

pub async fn open(url: &str) -> SqliteConnection {
    SqliteConnection::connect(url)
        .await
        .unwrap_or_else(|e| panic!("Failed to open {url}: {e}"))
}

pub async fn table_exists(url: &str, table: &str) -> bool {
    let mut conn = open(url).await;
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(&mut conn)
            .await
            .expect("sqlite_master query failed");
    count > 0
}

pub async fn count_rows(url: &str, table: &str) -> i64 {
    let mut conn = open(url).await;
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(&mut conn)
        .await
        .unwrap_or_else(|e| panic!("Failed to count {table}: {e}"))
}

/// Bookkeeping rows as `(filename, fingerprint)`, in insertion order.
pub async fn records(url: &str) -> Vec<(String, String)> {
    let mut conn = open(url).await;
    sqlx::query_as("SELECT \"Filename\", \"Fingerprint\" FROM \"Migrations\" ORDER BY \"Id\"")
        .fetch_all(&mut conn)
        .await
        .expect("failed to read Migrations")
}
