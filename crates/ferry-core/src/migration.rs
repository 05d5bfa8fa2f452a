//! Parsed migration scripts.

use std::cmp::Ordering;
use std::path::Path;

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::fingerprint::fingerprint;

/// Marker that, at the very start of a script, disables its transaction.
pub const NO_TRANSACTION_MARKER: &str = "-- no transaction --";

/// Line that separates command batches within a script.
pub const BATCH_DELIMITER: &str = "GO";

const UTF8_BOM: char = '\u{feff}';

/// One migration script, parsed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Base filename; the identity used for already-applied lookups.
    pub name: String,
    /// Hex content fingerprint over normalized line endings.
    pub fingerprint: String,
    /// Non-empty command batches in file order.
    pub commands: Vec<String>,
    /// False when the script starts with [`NO_TRANSACTION_MARKER`].
    pub use_transaction: bool,
    /// True when the name starts with one of the auto-run prefixes.
    pub auto_run_if_changed: bool,
}

impl MigrationFile {
    /// Parses a script from its text.
    #[must_use]
    pub fn parse<S: AsRef<str>>(
        name: impl Into<String>,
        content: &str,
        auto_run_prefixes: &[S],
    ) -> Self {
        let name = name.into();
        let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);

        let fingerprint = fingerprint(content);
        let commands = split_commands(content);
        let use_transaction = !content.starts_with(NO_TRANSACTION_MARKER);
        let auto_run_if_changed = auto_run_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_ref()));

        debug!(
            file = %name,
            fingerprint = %fingerprint,
            commands = commands.len(),
            use_transaction,
            auto_run_if_changed,
            "Parsed migration"
        );

        Self {
            name,
            fingerprint,
            commands,
            use_transaction,
            auto_run_if_changed,
        }
    }

    /// Parses a script from raw bytes, which must be UTF-8.
    pub fn from_bytes<S: AsRef<str>>(
        path: &Path,
        bytes: &[u8],
        auto_run_prefixes: &[S],
    ) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrateError::InvalidFile {
                path: path.to_path_buf(),
                message: "file name is not valid UTF-8".to_string(),
            })?;

        let content = std::str::from_utf8(bytes).map_err(|e| MigrateError::InvalidFile {
            path: path.to_path_buf(),
            message: format!("content is not valid UTF-8: {e}"),
        })?;

        Ok(Self::parse(name, content, auto_run_prefixes))
    }
}

/// Splits script text into batches on lines consisting solely of `GO`.
///
/// The delimiter is case-insensitive and may be surrounded by whitespace.
/// Batches are trimmed and empty ones dropped.
#[must_use]
pub fn split_commands(content: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        if line.trim().eq_ignore_ascii_case(BATCH_DELIMITER) {
            push_batch(&mut commands, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_batch(&mut commands, &current);

    commands
}

fn push_batch(commands: &mut Vec<String>, lines: &[&str]) {
    let batch = lines.join("\n");
    let trimmed = batch.trim();
    if !trimmed.is_empty() {
        commands.push(trimmed.to_string());
    }
}

/// Orders filenames case-insensitively, falling back to ordinal order for
/// names that differ only in case.
#[must_use]
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let upper_a = a.chars().flat_map(char::to_uppercase);
    let upper_b = b.chars().flat_map(char::to_uppercase);
    upper_a.cmp(upper_b).then_with(|| a.cmp(b))
}

/// Sorts migrations into execution order.
pub fn sort_migrations(migrations: &mut [MigrationFile]) {
    migrations.sort_by(|a, b| compare_names(&a.name, &b.name));
}
