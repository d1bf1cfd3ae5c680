//! The SQLite pool behind every [`Repository`](crate::Repository).

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// One writer plus a couple of readers.
const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Settings `SqliteConnectOptions` has no setter for; run on every new
/// connection.
const CONNECTION_PRAGMAS: &[&str] =
    &["PRAGMA wal_autocheckpoint = 1000", "PRAGMA cache_size = -16384", "PRAGMA temp_store = MEMORY"];

/// Handle to the configuration and cache database.
///
/// Opened once per run and handed to each [`Repository`](crate::Repository)
/// by reference. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file at `path` and apply any
    /// pending migrations. Missing parent directories are created.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        let options = connect_options().filename(path).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// A private, migrated database that lives as long as the handle.
    ///
    /// Not gated on `cfg(test)`: downstream crates test against it too.
    pub async fn connect_in_memory() -> Result<Self> {
        // Each in-memory connection is its own database, so the pool must
        // never open a second one.
        Self::open(connect_options().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| Box::pin(async move { apply_pragmas(conn).await }))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply embedded migrations that have not run yet. Both constructors
    /// already do this.
    #[instrument("applying migrations", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections to return, then close them all.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

fn connect_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        // Cascading deletes depend on it.
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
}

async fn apply_pragmas(conn: &mut SqliteConnection) -> sqlx::Result<()> {
    for &pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}
