//! Migration executor.
//!
//! Applies planned actions against one database session in filename order,
//! owning the transaction scope that spans files: which transaction is open
//! and which files have only provisionally committed inside it.

use std::time::Instant;

use chrono::Utc;
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::error::{MigrateError, Result};
use crate::gateway::PersistenceGateway;
use crate::history::{ExecutionHistory, MigrationRecord};
use crate::migration::{MigrationFile, compare_names};
use crate::options::MigrateOptions;
use crate::planner::{Action, plan};

/// Counts and outcome of one run.
#[derive(Debug, Default, Serialize)]
pub struct MigrationResult {
    /// Whether every file was handled and the final commit succeeded.
    pub success: bool,
    /// Files processed, including the one that failed.
    pub attempted: usize,
    /// Files that ran for the first time.
    pub ran: usize,
    /// Auto-run files re-applied after a change.
    pub auto_ran: usize,
    /// Changed files re-applied because of force mode.
    pub forced: usize,
    /// Files skipped, including no-transaction files skipped in preview.
    pub skipped: usize,
    /// Files whose bookkeeping row was renamed.
    pub renamed: usize,
    /// Why the run stopped, if it failed.
    pub failure: Option<RunFailure>,
}

/// The terminal error of a failed run.
#[derive(Debug, Serialize)]
pub struct RunFailure {
    /// File in flight when the run failed; `None` if the final commit failed.
    pub filename: Option<String>,
    /// Underlying cause.
    #[serde(serialize_with = "serialize_error")]
    pub error: MigrateError,
    /// Whether an open transaction was rolled back.
    pub transaction_rolled_back: bool,
    /// Earlier files whose effects were rolled back and will re-run next time.
    pub rolled_back_files: Vec<String>,
    /// The failing file ran outside a transaction; its partial effects remain.
    pub without_transaction: bool,
}

fn serialize_error<S: Serializer>(
    error: &MigrateError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Skipped,
    Ran,
    AutoRan,
    Forced,
    Renamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordWrite {
    Insert,
    UpdateFingerprint,
}

#[derive(Debug, Default)]
struct TransactionScope {
    open: bool,
    pending: Vec<String>,
}

/// Loads the execution history, treating a missing table as empty.
pub async fn load_history<G>(gateway: &mut G) -> Result<ExecutionHistory>
where
    G: PersistenceGateway + ?Sized,
{
    if gateway.table_exists().await? {
        Ok(ExecutionHistory::new(gateway.load_records().await?))
    } else {
        Ok(ExecutionHistory::empty())
    }
}

/// Executes migrations against one database session.
pub struct MigrationExecutor<'g, G: PersistenceGateway + ?Sized> {
    gateway: &'g mut G,
    options: MigrateOptions,
    history: ExecutionHistory,
    records_persist: bool,
    scope: TransactionScope,
}

impl<'g, G: PersistenceGateway + ?Sized> MigrationExecutor<'g, G> {
    /// Validates the options, ensures the bookkeeping table exists (except in
    /// preview) and loads the execution history.
    pub async fn prepare(gateway: &'g mut G, options: MigrateOptions) -> Result<Self> {
        options.validate()?;

        let table_existed = gateway.table_exists().await?;
        if !table_existed && !options.preview {
            info!(table = %options.table, "Creating migrations table");
            gateway.create_table().await?;
        }

        let history = if table_existed {
            ExecutionHistory::new(gateway.load_records().await?)
        } else {
            ExecutionHistory::empty()
        };

        let mode = if options.uses_global_transaction() {
            "global"
        } else {
            "individual"
        };
        info!(mode, "Transaction mode");
        info!(count = history.len(), "Prior migrations");
        if let Some(last) = history.last() {
            info!(
                file = %last.filename,
                executed_at = %last.executed_at.format("%Y-%m-%d %H:%M:%SZ"),
                "Last migration"
            );
        }
        if options.preview && !options.global_transaction {
            info!("Using global transaction mode because of preview mode");
        }

        Ok(Self {
            gateway,
            records_persist: table_existed || !options.preview,
            options,
            history,
            scope: TransactionScope::default(),
        })
    }

    /// Returns the history loaded at preparation.
    #[must_use]
    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Returns the run options.
    #[must_use]
    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// Plans every file without executing anything.
    #[must_use]
    pub fn plan_all<'f>(&self, files: &'f [MigrationFile]) -> Vec<(&'f MigrationFile, Action)> {
        files
            .iter()
            .map(|file| (file, plan(file, &self.history)))
            .collect()
    }

    /// Runs all files in case-insensitive filename order, stopping at the
    /// first failure. On return no transaction is left open.
    pub async fn run(&mut self, files: &[MigrationFile]) -> MigrationResult {
        info!(
            preview = self.options.preview,
            files = files.len(),
            "Running migrations"
        );

        let mut ordered: Vec<&MigrationFile> = files.iter().collect();
        ordered.sort_by(|a, b| compare_names(&a.name, &b.name));

        let mut result = MigrationResult::default();
        let mut current = None;

        match self.run_ordered(&ordered, &mut result, &mut current).await {
            Ok(()) => result.success = true,
            Err(err) => result.failure = Some(self.fail(current, err).await),
        }

        self.log_summary(&result);
        result
    }

    async fn run_ordered<'f>(
        &mut self,
        files: &[&'f MigrationFile],
        result: &mut MigrationResult,
        current: &mut Option<&'f MigrationFile>,
    ) -> Result<()> {
        for &file in files {
            *current = Some(file);
            result.attempted += 1;

            match self.migrate(file).await? {
                Outcome::Skipped => result.skipped += 1,
                Outcome::Ran => result.ran += 1,
                Outcome::AutoRan => result.auto_ran += 1,
                Outcome::Forced => result.forced += 1,
                Outcome::Renamed => result.renamed += 1,
            }
        }
        *current = None;

        if self.scope.open {
            self.close_transaction().await?;
        }

        Ok(())
    }

    async fn migrate(&mut self, file: &MigrationFile) -> Result<Outcome> {
        let action = plan(file, &self.history);
        debug!(file = %file.name, %action, "Planned migration");

        match action {
            Action::Skip => Ok(Outcome::Skipped),

            Action::Rename => {
                self.rename(file).await?;
                Ok(Outcome::Renamed)
            }

            Action::HashMismatch if !self.options.force => Err(MigrateError::ContentChanged {
                filename: file.name.clone(),
            }),

            Action::Run | Action::AutoRun | Action::HashMismatch
                if self.options.preview && !file.use_transaction =>
            {
                info!(
                    file = %file.name,
                    "Skipping; it cannot be run in preview mode because the no-transaction header is set"
                );
                Ok(Outcome::Skipped)
            }

            Action::Run => {
                if file.use_transaction {
                    info!(file = %file.name, "Running");
                } else {
                    info!(file = %file.name, "Running (NO TRANSACTION)");
                }
                self.apply(file, RecordWrite::Insert).await?;
                Ok(Outcome::Ran)
            }

            Action::AutoRun => {
                info!(
                    file = %file.name,
                    "Changed since it was run; running again because it is an auto-run migration"
                );
                self.apply(file, RecordWrite::UpdateFingerprint).await?;
                Ok(Outcome::AutoRan)
            }

            Action::HashMismatch => {
                info!(
                    file = %file.name,
                    "Modified since it was run; running again because --force was used"
                );
                self.apply(file, RecordWrite::UpdateFingerprint).await?;
                Ok(Outcome::Forced)
            }
        }
    }

    async fn rename(&mut self, file: &MigrationFile) -> Result<()> {
        if let Some(existing) = self.history.by_fingerprint(&file.fingerprint) {
            info!(
                database = %existing.filename,
                filesystem = %file.name,
                "Filename has changed; updating"
            );
        }

        self.begin_file(true).await?;
        self.gateway
            .rename_record(&file.fingerprint, &file.name)
            .await?;
        self.end_file(file).await
    }

    async fn apply(&mut self, file: &MigrationFile, write: RecordWrite) -> Result<()> {
        self.begin_file(file.use_transaction).await?;

        let started = Instant::now();
        for (index, command) in file.commands.iter().enumerate() {
            let affected = self
                .gateway
                .execute(command, self.options.command_timeout)
                .await?;
            if affected == 0 {
                info!(batch = index + 1, "Result: no rows affected");
            } else {
                info!(batch = index + 1, "Result: {affected} rows");
            }
        }
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        if self.records_persist {
            let record =
                MigrationRecord::new(&file.name, &file.fingerprint, Utc::now(), duration_ms);
            match write {
                RecordWrite::Insert => self.gateway.insert_record(&record).await?,
                RecordWrite::UpdateFingerprint => {
                    self.gateway.update_fingerprint(&record).await?;
                }
            }
        } else {
            debug!(file = %file.name, "Migrations table absent in preview; not recording");
        }

        self.end_file(file).await
    }

    async fn begin_file(&mut self, use_transaction: bool) -> Result<()> {
        if use_transaction {
            if !self.scope.open {
                self.gateway.begin().await?;
                self.scope.open = true;
                debug!("Began transaction");
            }
        } else if self.scope.open {
            info!("Breaking up global transaction");
            self.close_transaction().await?;
        }
        Ok(())
    }

    async fn end_file(&mut self, file: &MigrationFile) -> Result<()> {
        if self.scope.open {
            self.scope.pending.push(file.name.clone());
            if !self.options.uses_global_transaction() {
                self.close_transaction().await?;
            }
        }
        Ok(())
    }

    /// Commits the open transaction, or rolls it back in preview mode.
    async fn close_transaction(&mut self) -> Result<()> {
        if self.options.preview {
            self.gateway.rollback().await?;
            debug!(files = %self.scope.pending.join(", "), "Rolled back preview transaction");
        } else {
            self.gateway.commit().await?;
            if self.options.uses_global_transaction() && !self.scope.pending.is_empty() {
                info!(
                    files = %self.scope.pending.join(", "),
                    "Committed migrations which ran in the transaction"
                );
            } else {
                debug!("Committed transaction");
            }
        }

        self.scope.open = false;
        self.scope.pending.clear();
        Ok(())
    }

    async fn fail(&mut self, current: Option<&MigrationFile>, err: MigrateError) -> RunFailure {
        let filename = current.map(|f| f.name.clone());
        let without_transaction = !self.scope.open && current.is_some_and(|f| !f.use_transaction);

        match &filename {
            Some(name) if without_transaction => error!(file = %name, "FAILED WITHOUT A TRANSACTION"),
            Some(name) => error!(file = %name, "FAILED"),
            None => error!("ERROR"),
        }
        error!("{err}");

        let mut rolled_back_files = Vec::new();
        let mut transaction_rolled_back = false;

        if self.scope.open {
            rolled_back_files = std::mem::take(&mut self.scope.pending);
            if !rolled_back_files.is_empty() {
                warn!("Rolling back prior migrations; they will be re-attempted on the next run:");
                for file in &rolled_back_files {
                    warn!("    {file}");
                }
            }

            self.scope.open = false;
            match self.gateway.rollback().await {
                Ok(()) => transaction_rolled_back = true,
                Err(rollback_err) => error!(error = %rollback_err, "Rollback failed"),
            }
        }

        if without_transaction {
            warn!("Statements that ran before the failure were not rolled back");
        }

        RunFailure {
            filename,
            error: err,
            transaction_rolled_back,
            rolled_back_files,
            without_transaction,
        }
    }

    fn log_summary(&self, result: &MigrationResult) {
        info!("Attempted {} migrations.", result.attempted);
        for (label, count) in [
            ("Ran", result.ran),
            ("Auto-ran", result.auto_ran),
            ("Forced", result.forced),
            ("Skipped", result.skipped),
            ("Renamed", result.renamed),
        ] {
            if count > 0 {
                info!("  {label}: {count}");
            }
        }

        let suffix = if self.options.preview { " (preview mode)" } else { "" };
        if result.success {
            info!("SUCCESS{suffix}");
        } else {
            error!("FAIL{suffix}");
        }
    }
}
