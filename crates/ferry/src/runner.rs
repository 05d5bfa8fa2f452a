//! Multi-target runs.
//!
//! Each target gets its own connection, history and executor and runs the
//! full sequential procedure. Targets run concurrently up to a worker
//! limit; the only state they share is the failure flag that stops new
//! targets from launching when `stop_on_failure` is set.

use std::sync::atomic::{AtomicBool, Ordering};

use ferry_core::prelude::*;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::dialect;
use crate::target::Target;

/// How a set of targets is processed.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Options applied to every target.
    pub options: MigrateOptions,
    /// Only count outstanding migrations; never touch the database.
    pub count_only: bool,
    /// Maximum number of targets in flight.
    pub workers: usize,
    /// Stop launching new targets after the first failure.
    pub stop_on_failure: bool,
}

impl RunConfig {
    /// Creates a config that migrates one target at a time.
    pub fn new(options: MigrateOptions) -> Self {
        Self {
            options,
            count_only: false,
            workers: 1,
            stop_on_failure: false,
        }
    }

    /// Sets count-only mode.
    #[must_use]
    pub fn count_only(mut self, enabled: bool) -> Self {
        self.count_only = enabled;
        self
    }

    /// Sets the worker limit. Zero is treated as one.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the stop-on-failure policy.
    #[must_use]
    pub fn stop_on_failure(mut self, enabled: bool) -> Self {
        self.stop_on_failure = enabled;
        self
    }
}

/// What happened to one target.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    /// The executor ran; see the result for success.
    Completed {
        /// Counts and failure details.
        result: MigrationResult,
    },
    /// Count mode finished.
    Counted {
        /// Files whose planned action is not `Skip`.
        outstanding: usize,
    },
    /// The database could not be reached.
    ConnectionFailed {
        /// Error message.
        error: String,
    },
    /// The run stopped before any file was processed, e.g. while loading history.
    Aborted {
        /// Error message.
        error: String,
    },
    /// Skipped because another target had already failed.
    NotStarted,
}

impl TargetOutcome {
    /// Whether this outcome counts as a success.
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Completed { result } => result.success,
            Self::Counted { .. } => true,
            Self::ConnectionFailed { .. } | Self::Aborted { .. } | Self::NotStarted => false,
        }
    }
}

/// Outcome of one target, labelled with its redacted URL.
#[derive(Debug, Serialize)]
pub struct TargetReport {
    /// Redacted connection URL.
    pub target: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

/// Outcome of a whole invocation.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// True when every target succeeded.
    pub success: bool,
    /// Per-target outcomes, in the order the targets were given.
    pub targets: Vec<TargetReport>,
}

/// Runs `files` against every target.
///
/// Targets are launched in order; at most `config.workers` run at once.
/// A target already in flight is never aborted.
pub async fn run_targets(
    targets: &[Target],
    files: &[MigrationFile],
    config: &RunConfig,
) -> RunReport {
    let failed = AtomicBool::new(false);

    let reports: Vec<TargetReport> = stream::iter(targets)
        .map(|target| {
            let failed = &failed;
            async move {
                let outcome = if config.stop_on_failure && failed.load(Ordering::Acquire) {
                    warn!(database = %target, "Not started because an earlier target failed");
                    TargetOutcome::NotStarted
                } else {
                    let span = info_span!("target", database = %target);
                    run_target(target, files, config).instrument(span).await
                };
                if !outcome.succeeded() {
                    failed.store(true, Ordering::Release);
                }
                TargetReport {
                    target: target.display_name(),
                    outcome,
                }
            }
        })
        .buffered(config.workers.max(1))
        .collect()
        .await;

    let success = !failed.load(Ordering::Acquire);
    if targets.len() > 1 {
        let succeeded = reports.iter().filter(|r| r.outcome.succeeded()).count();
        info!("{succeeded} of {} databases succeeded", targets.len());
    }

    RunReport {
        success,
        targets: reports,
    }
}

/// Runs one target, always closing its connection.
pub async fn run_target(
    target: &Target,
    files: &[MigrationFile],
    config: &RunConfig,
) -> TargetOutcome {
    let mut gateway = match dialect::connect(target, &config.options.table).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("{err}");
            return TargetOutcome::ConnectionFailed {
                error: err.to_string(),
            };
        }
    };
    info!(dialect = gateway.dialect(), "Connected");

    let outcome = if config.count_only {
        count(gateway.as_mut(), files).await
    } else {
        migrate(gateway.as_mut(), files, &config.options).await
    };

    if let Err(err) = gateway.close().await {
        warn!(error = %err, "Failed to close connection");
    }
    outcome
}

async fn count(gateway: &mut dyn PersistenceGateway, files: &[MigrationFile]) -> TargetOutcome {
    match load_history(gateway).await {
        Ok(history) => {
            let outstanding = outstanding_count(files, &history);
            debug!(outstanding, "Counted outstanding migrations");
            TargetOutcome::Counted { outstanding }
        }
        Err(err) => {
            error!("{err}");
            TargetOutcome::Aborted {
                error: err.to_string(),
            }
        }
    }
}

async fn migrate(
    gateway: &mut dyn PersistenceGateway,
    files: &[MigrationFile],
    options: &MigrateOptions,
) -> TargetOutcome {
    let mut executor = match MigrationExecutor::prepare(gateway, options.clone()).await {
        Ok(executor) => executor,
        Err(err) => {
            error!("{err}");
            return TargetOutcome::Aborted {
                error: err.to_string(),
            };
        }
    };
    let result = executor.run(files).await;
    TargetOutcome::Completed { result }
}
