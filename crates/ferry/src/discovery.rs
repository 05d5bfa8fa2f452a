//! Migration script discovery.

use std::fs;
use std::path::Path;

use ferry_core::migration::sort_migrations;
use ferry_core::{MigrateError, MigrationFile, Result};
use tracing::debug;

/// Extension of migration scripts, matched case-insensitively.
pub const MIGRATION_EXTENSION: &str = "sql";

/// Reads every `*.sql` file directly inside `dir`, in application order.
///
/// Subdirectories are not searched.
pub fn discover<S: AsRef<str>>(dir: &Path, auto_run_prefixes: &[S]) -> Result<Vec<MigrationFile>> {
    if !dir.is_dir() {
        return Err(MigrateError::MigrationsDirNotFound(dir.to_path_buf()));
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_migration(&path) {
            continue;
        }
        let bytes = fs::read(&path)?;
        migrations.push(MigrationFile::from_bytes(&path, &bytes, auto_run_prefixes)?);
    }

    sort_migrations(&mut migrations);
    debug!(dir = %dir.display(), count = migrations.len(), "Discovered migrations");
    Ok(migrations)
}

fn is_migration(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MIGRATION_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIXES: &[&str] = &["SP", "AUTORUN"];

    #[test]
    fn test_discovers_sql_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_second.sql"), "SELECT 2").unwrap();
        fs::write(dir.path().join("A_first.SQL"), "SELECT 1").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a migration").unwrap();
        fs::create_dir(dir.path().join("nested.sql")).unwrap();

        let files = discover(dir.path(), PREFIXES).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A_first.SQL", "b_second.sql"]);
    }

    #[test]
    fn test_applies_auto_run_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SP_report.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("001_init.sql"), "SELECT 1; SELECT 2").unwrap();

        let files = discover(dir.path(), PREFIXES).unwrap();
        assert!(!files[0].auto_run_if_changed);
        assert!(files[1].auto_run_if_changed);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            discover(&missing, PREFIXES),
            Err(MigrateError::MigrationsDirNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.sql"), [0x53, 0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            discover(dir.path(), PREFIXES),
            Err(MigrateError::InvalidFile { .. })
        ));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), PREFIXES).unwrap().is_empty());
    }
}
