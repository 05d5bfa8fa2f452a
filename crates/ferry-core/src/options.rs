//! Run options.

use std::time::Duration;

use crate::error::{MigrateError, Result};

/// Default name of the bookkeeping table.
pub const DEFAULT_TABLE: &str = "Migrations";

/// Default per-batch command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Filename prefixes of scripts that re-run silently whenever they change.
pub const DEFAULT_AUTO_RUN_PREFIXES: &[&str] = &["SP", "AUTORUN"];

/// Options controlling a migration run against one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Run outstanding migrations, then roll everything back.
    pub preview: bool,
    /// Fold all transactional migrations into one transaction.
    pub global_transaction: bool,
    /// Re-run scripts whose content changed since they were applied.
    pub force: bool,
    /// Timeout applied to each command batch.
    pub command_timeout: Duration,
    /// Name of the bookkeeping table.
    pub table: String,
    /// Filename prefixes that mark a script as auto-run-if-changed.
    pub auto_run_prefixes: Vec<String>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            preview: false,
            global_transaction: false,
            force: false,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            table: DEFAULT_TABLE.to_string(),
            auto_run_prefixes: DEFAULT_AUTO_RUN_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

impl MigrateOptions {
    /// Enables preview mode.
    #[must_use]
    pub fn preview(mut self, enabled: bool) -> Self {
        self.preview = enabled;
        self
    }

    /// Enables global transaction mode.
    #[must_use]
    pub fn global_transaction(mut self, enabled: bool) -> Self {
        self.global_transaction = enabled;
        self
    }

    /// Enables force mode.
    #[must_use]
    pub fn force(mut self, enabled: bool) -> Self {
        self.force = enabled;
        self
    }

    /// Sets the bookkeeping table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Whether transactional scripts share one transaction. Preview always
    /// does, so later scripts see the effects of earlier ones.
    #[must_use]
    pub fn uses_global_transaction(&self) -> bool {
        self.global_transaction || self.preview
    }

    /// Checks the options before a run.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.table) {
            return Err(MigrateError::InvalidConfig(format!(
                "migrations table name '{}' must contain only ASCII letters, digits and underscores, and must not start with a digit",
                self.table
            )));
        }

        if self.command_timeout.is_zero() {
            return Err(MigrateError::InvalidConfig(
                "command timeout must be greater than zero".to_string(),
            ));
        }

        if self.auto_run_prefixes.iter().any(String::is_empty) {
            return Err(MigrateError::InvalidConfig(
                "auto-run prefixes must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
