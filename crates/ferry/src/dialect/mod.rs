//! Database dialect implementations.
//!
//! Each dialect implements [`PersistenceGateway`] over a single owned
//! connection. The bookkeeping table layout is the same everywhere: an
//! identity key, the filename, the fingerprint, the UTC execution time and
//! the duration in milliseconds, with filename and fingerprint each unique.

mod postgres;
mod sqlite;

pub use postgres::PgGateway;
pub use sqlite::SqliteGateway;

use ferry_core::{MigrateError, PersistenceGateway, Result};

use crate::target::Target;

/// Database products with a gateway implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite, `sqlite:` URLs.
    Sqlite,
    /// PostgreSQL, `postgres:` or `postgresql:` URLs.
    Postgres,
}

impl Dialect {
    /// Picks the dialect from the URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        match scheme.as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(MigrateError::InvalidConfig(format!(
                "unsupported database URL '{url}': expected a sqlite: or postgres: scheme"
            ))),
        }
    }

    /// Returns the dialect name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Opens a gateway for `target` keeping its bookkeeping rows in `table`.
pub async fn connect(target: &Target, table: &str) -> Result<Box<dyn PersistenceGateway>> {
    match Dialect::from_url(target.url())? {
        Dialect::Sqlite => Ok(Box::new(SqliteGateway::connect(target, table).await?)),
        Dialect::Postgres => Ok(Box::new(PgGateway::connect(target, table).await?)),
    }
}

/// Quote an identifier (table name, column name, etc.).
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn connection_error(target: &Target, err: sqlx::Error) -> MigrateError {
    MigrateError::Connection {
        target: target.display_name(),
        source: Box::new(err),
    }
}

/// Returns the live connection, or an error once the gateway is closed.
fn live<C>(conn: &mut Option<C>) -> Result<&mut C> {
    conn.as_mut().ok_or(MigrateError::ConnectionClosed)
}

/// Fails unless a bookkeeping statement touched exactly one row.
fn expect_one(operation: &'static str, key: &str, affected: u64) -> Result<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(MigrateError::Bookkeeping {
            operation,
            key: key.to_string(),
            affected,
        })
    }
}
