//! Database module for streamwatch.
//!
//! SQLite persistence via sqlx: connection pool, migrations, models,
//! repositories and periodic maintenance.

pub mod maintenance;
pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

pub use maintenance::{MaintenanceConfig, MaintenanceScheduler};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 8;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Pragmas applied to every new connection.
///
/// A 16MB page cache, checkpoints every 1000 pages and a 16MB WAL cap. The
/// tables are small; the write load is one tick's transaction at a time.
const CONNECTION_PRAGMAS: &[&str] = &[
    "PRAGMA cache_size = -16000",
    "PRAGMA wal_autocheckpoint = 1000",
    "PRAGMA journal_size_limit = 16777216",
    "PRAGMA temp_store = MEMORY",
];

async fn apply_connection_pragmas(conn: &mut sqlx::SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(*pragma).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn ensure_wal_mode(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" && mode != "memory" {
        tracing::warn!("journal_mode was '{}', expected 'wal'; re-setting", mode);
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Initialize the database connection pool with WAL mode.
///
/// In-memory databases (`sqlite::memory:`) are private to each connection,
/// so callers using one should pass `max_connections = 1`.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        // Enable WAL mode for concurrent reads during writes
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    ensure_wal_mode(&pool).await?;

    tracing::info!(max_connections, url = %database_url, "Database pool ready");

    Ok(pool)
}

/// Initialize the database connection pool with default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let size = if database_url.contains(":memory:") {
        1
    } else {
        DEFAULT_POOL_SIZE
    };
    init_pool_with_size(database_url, size).await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn begin_immediate(pool: &DbPool) -> Result<ImmediateTransaction, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(ImmediateTransaction::new(conn))
}

/// Wrapper for a manual immediate transaction.
///
/// `BEGIN IMMEDIATE` takes the write lock up front, so two writers never
/// deadlock trying to upgrade from a shared read lock.
pub struct ImmediateTransaction {
    conn: sqlx::pool::PoolConnection<Sqlite>,
    finished: bool,
}

impl ImmediateTransaction {
    pub fn new(conn: sqlx::pool::PoolConnection<Sqlite>) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

impl std::ops::Deref for ImmediateTransaction {
    type Target = sqlx::SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for ImmediateTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        // An unfinished transaction must not go back to the pool mid-BEGIN.
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

/// Fresh in-memory database with the schema applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = init_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
