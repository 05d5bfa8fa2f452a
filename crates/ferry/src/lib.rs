//! Database side of the `ferry` migration tool.
//!
//! `ferry-core` decides what to run; this crate connects to real databases
//! and drives it:
//!
//! - [`dialect`] - [`PersistenceGateway`](ferry_core::PersistenceGateway)
//!   implementations for SQLite and PostgreSQL
//! - [`discovery`] - reads `*.sql` scripts from a directory
//! - [`target`] - connection URLs and their redacted display form
//! - [`runner`] - runs one or many targets and folds their outcomes

pub mod dialect;
pub mod discovery;
pub mod runner;
pub mod target;

pub use discovery::discover;
pub use runner::{RunConfig, RunReport, TargetOutcome, TargetReport, run_target, run_targets};
pub use target::Target;
