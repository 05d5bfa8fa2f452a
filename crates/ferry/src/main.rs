//! ferry CLI
//!
//! Applies the `*.sql` scripts of a directory to one or more databases,
//! running each script exactly once.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use ferry::{RunConfig, RunReport, Target, TargetOutcome, discover, run_targets};
use ferry_core::options::DEFAULT_TABLE;
use ferry_core::prelude::*;

/// Run-once SQL migrations.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (`sqlite:` or `postgres:`). Repeat or separate with commas
    /// to migrate several databases.
    #[arg(
        short,
        long = "database",
        env = "DATABASE_URL",
        value_delimiter = ',',
        required = true
    )]
    databases: Vec<String>,

    /// Directory containing the migration scripts.
    #[arg(long, env = "FERRY_DIR", default_value = ".")]
    dir: PathBuf,

    /// Name of the bookkeeping table.
    #[arg(long, default_value = DEFAULT_TABLE)]
    table: String,

    /// Timeout for each command batch, in seconds.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Run outstanding migrations inside one transaction, then roll it back.
    #[arg(long)]
    preview: bool,

    /// Run all migrations in a single transaction.
    #[arg(long)]
    global: bool,

    /// Re-run scripts that changed since they were applied.
    #[arg(long)]
    force: bool,

    /// Print the number of outstanding migrations without running them.
    #[arg(long)]
    count: bool,

    /// Filename prefix of scripts that re-run whenever they change.
    #[arg(long = "auto-run-prefix", default_values = ["SP", "AUTORUN"])]
    auto_run_prefixes: Vec<String>,

    /// Databases migrated concurrently (default: available processors).
    #[arg(long)]
    workers: Option<NonZeroUsize>,

    /// Do not start further databases after one fails.
    #[arg(long)]
    stop_on_failure: bool,

    /// Format of the final report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::WARN
        } else {
            Level::INFO
        }
    }

    fn migrate_options(&self) -> MigrateOptions {
        MigrateOptions {
            preview: self.preview,
            global_transaction: self.global,
            force: self.force,
            command_timeout: Duration::from_secs(self.timeout),
            table: self.table.clone(),
            auto_run_prefixes: self.auto_run_prefixes.clone(),
        }
    }

    fn workers(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the report.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level())
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = cli.migrate_options();
    options.validate()?;

    let targets: Vec<Target> = cli.databases.iter().map(Target::new).collect();
    for target in &targets {
        target.dialect()?;
    }

    info!(directory = %cli.dir.display(), "Migrations directory");
    let files = discover(&cli.dir, &options.auto_run_prefixes)?;

    let config = RunConfig::new(options)
        .count_only(cli.count)
        .workers(cli.workers())
        .stop_on_failure(cli.stop_on_failure);
    let report = run_targets(&targets, &files, &config).await;

    print_report(&report, cli.format)?;

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            let labelled = report.targets.len() > 1;
            for entry in &report.targets {
                if let TargetOutcome::Counted { outstanding } = entry.outcome {
                    if labelled {
                        println!("{}: {outstanding} outstanding migrations", entry.target);
                    } else {
                        println!("{outstanding} outstanding migrations");
                    }
                }
            }
        }
    }
    Ok(())
}
