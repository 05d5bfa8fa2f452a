//! Per-file migration planning.

use std::fmt;

use serde::Serialize;

use crate::history::ExecutionHistory;
use crate::migration::MigrationFile;

/// What to do with a migration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Already applied with identical content.
    Skip,
    /// Never applied.
    Run,
    /// Applied under a different filename with identical content.
    Rename,
    /// Applied, but the content changed and the file is not auto-run.
    HashMismatch,
    /// Applied, the content changed, and the file re-runs silently.
    AutoRun,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Skip => "skip",
            Self::Run => "run",
            Self::Rename => "rename",
            Self::HashMismatch => "hash mismatch",
            Self::AutoRun => "auto-run",
        };
        f.write_str(name)
    }
}

/// Decides the action for one file. Filename matches take precedence over
/// fingerprint matches.
#[must_use]
pub fn plan(file: &MigrationFile, history: &ExecutionHistory) -> Action {
    if let Some(record) = history.by_filename(&file.name) {
        if record.fingerprint == file.fingerprint {
            Action::Skip
        } else if file.auto_run_if_changed {
            Action::AutoRun
        } else {
            Action::HashMismatch
        }
    } else if history.by_fingerprint(&file.fingerprint).is_some() {
        Action::Rename
    } else {
        Action::Run
    }
}

/// Number of files that would not be skipped.
#[must_use]
pub fn outstanding_count(files: &[MigrationFile], history: &ExecutionHistory) -> usize {
    files
        .iter()
        .filter(|file| plan(file, history) != Action::Skip)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MigrationRecord;
    use chrono::Utc;

    const PREFIXES: &[&str] = &["SP", "AUTORUN"];

    fn file(name: &str, content: &str) -> MigrationFile {
        MigrationFile::parse(name, content, PREFIXES)
    }

    fn history_of(files: &[MigrationFile]) -> ExecutionHistory {
        ExecutionHistory::new(
            files
                .iter()
                .map(|f| MigrationRecord::new(&f.name, &f.fingerprint, Utc::now(), 1))
                .collect(),
        )
    }

    #[test]
    fn test_new_file_runs() {
        let f = file("001_init.sql", "CREATE TABLE a (id int)");
        assert_eq!(plan(&f, &ExecutionHistory::empty()), Action::Run);
    }

    #[test]
    fn test_unchanged_file_skips() {
        let f = file("001_init.sql", "CREATE TABLE a (id int)");
        assert_eq!(plan(&f, &history_of(&[f.clone()])), Action::Skip);
    }

    #[test]
    fn test_line_ending_change_still_skips() {
        let applied = file("001_init.sql", "CREATE TABLE a (\nid int)");
        let checkout = file("001_init.sql", "CREATE TABLE a (\r\nid int)");
        assert_eq!(plan(&checkout, &history_of(&[applied])), Action::Skip);
    }

    #[test]
    fn test_edited_file_is_hash_mismatch() {
        let applied = file("001_init.sql", "CREATE TABLE a (id int)");
        let edited = file("001_init.sql", "CREATE TABLE a (id bigint)");
        assert_eq!(plan(&edited, &history_of(&[applied])), Action::HashMismatch);
    }

    #[test]
    fn test_edited_auto_run_file_auto_runs() {
        let applied = file("SP_GetUsers.sql", "CREATE PROCEDURE v1");
        let edited = file("SP_GetUsers.sql", "CREATE PROCEDURE v2");
        assert_eq!(plan(&edited, &history_of(&[applied])), Action::AutoRun);
    }

    #[test]
    fn test_renamed_file_is_rename() {
        let applied = file("001_init.sql", "CREATE TABLE a (id int)");
        let renamed = file("001_initial.sql", "CREATE TABLE a (id int)");
        assert_eq!(plan(&renamed, &history_of(&[applied])), Action::Rename);
    }

    #[test]
    fn test_renamed_and_edited_file_runs() {
        let applied = file("001_init.sql", "CREATE TABLE a (id int)");
        let moved = file("001_initial.sql", "CREATE TABLE a (id bigint)");
        assert_eq!(plan(&moved, &history_of(&[applied])), Action::Run);
    }

    #[test]
    fn test_filename_match_beats_fingerprint_match() {
        // 002 now holds 001's old content: the filename record wins.
        let one = file("001_init.sql", "SELECT 1");
        let two = file("002_next.sql", "SELECT 2");
        let history = history_of(&[one, two]);

        let swapped = file("002_next.sql", "SELECT 1");
        assert_eq!(plan(&swapped, &history), Action::HashMismatch);
    }

    #[test]
    fn test_outstanding_count() {
        let one = file("001_init.sql", "SELECT 1");
        let history = history_of(&[one.clone()]);
        let files = vec![
            one,
            file("002_next.sql", "SELECT 2"),
            file("003_more.sql", "SELECT 3"),
        ];
        assert_eq!(outstanding_count(&files, &history), 2);
        assert_eq!(outstanding_count(&files, &ExecutionHistory::empty()), 3);
    }
}
