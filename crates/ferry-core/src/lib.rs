//! Run-once SQL migration engine.
//!
//! `ferry-core` decides, for every migration script in a directory, whether it
//! must run, can be skipped, was merely renamed, or was edited after being
//! applied, and then applies those decisions against a database with the
//! right transaction boundaries.
//!
//! # Architecture
//!
//! - **Fingerprint** - SHA-256 of the script text with normalized line endings
//! - **Migration** - a parsed script: name, fingerprint, `GO`-separated batches
//!   and its transaction and auto-run flags
//! - **History** - the bookkeeping rows recorded by earlier runs
//! - **Planner** - maps a script and the history to an [`Action`]
//! - **Executor** - applies actions in filename order, managing global or
//!   per-file transactions, preview rollback and failure rollback
//! - **Gateway** - the [`PersistenceGateway`] trait each SQL dialect implements
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_core::prelude::*;
//!
//! let files = vec![
//!     MigrationFile::parse("001_init.sql", "CREATE TABLE users (id int)", &["SP"]),
//! ];
//!
//! let options = MigrateOptions::default().global_transaction(true);
//! let mut executor = MigrationExecutor::prepare(&mut gateway, options).await?;
//! let result = executor.run(&files).await;
//! assert!(result.success);
//! ```

pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod gateway;
pub mod history;
pub mod migration;
pub mod options;
pub mod planner;

#[cfg(test)]
mod testing;

pub use error::{MigrateError, Result};
pub use executor::{MigrationExecutor, MigrationResult, RunFailure, load_history};
pub use gateway::PersistenceGateway;
pub use history::{ExecutionHistory, MigrationRecord};
pub use migration::MigrationFile;
pub use options::MigrateOptions;
pub use planner::{Action, outstanding_count, plan};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{MigrationExecutor, MigrationResult, RunFailure, load_history};
    pub use crate::fingerprint::fingerprint;
    pub use crate::gateway::PersistenceGateway;
    pub use crate::history::{ExecutionHistory, MigrationRecord};
    pub use crate::migration::{MigrationFile, sort_migrations};
    pub use crate::options::MigrateOptions;
    pub use crate::planner::{Action, outstanding_count, plan};
}
