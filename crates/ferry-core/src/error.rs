//! Error types for the migration engine.

use std::path::PathBuf;
use std::time::Duration;

/// Boxed driver error carried through the engine without naming the driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while planning or applying migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A previously applied script was edited and is not whitelisted for auto-run.
    #[error("{filename} has been modified since it was run. Use --force to re-run it.")]
    ContentChanged {
        /// Name of the modified script.
        filename: String,
    },

    /// The database rejected a command batch or a bookkeeping statement.
    #[error("database error: {0}")]
    Database(#[source] BoxError),

    /// A command batch ran longer than the configured timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// A bookkeeping update matched an unexpected number of rows.
    #[error("bookkeeping integrity violation: {operation} for '{key}' affected {affected} rows, expected exactly 1")]
    Bookkeeping {
        /// The bookkeeping operation (`update fingerprint`, `rename`).
        operation: &'static str,
        /// Filename or fingerprint the operation matched on.
        key: String,
        /// Rows actually affected.
        affected: u64,
    },

    /// The database could not be reached.
    #[error("unable to connect to {target}: {source}")]
    Connection {
        /// Redacted target description.
        target: String,
        /// Underlying driver error.
        #[source]
        source: BoxError,
    },

    /// The gateway was used after it was closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A migration script could not be read as text.
    #[error("invalid migration file '{path}': {message}")]
    InvalidFile {
        /// Path of the offending file.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// The migrations directory does not exist.
    #[error("migrations directory not found: {}", .0.display())]
    MigrationsDirNotFound(PathBuf),

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error while reading the migrations directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Wraps a driver error as a [`MigrateError::Database`].
    pub fn database<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Database(Box::new(err))
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
