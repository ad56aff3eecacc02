use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::SimpleAsyncConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{Result, WealthWiseError};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Shared handle to the SQLite database. Cloning is cheap; every clone uses the same pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| WealthWiseError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| WealthWiseError::Database(e.to_string()))?;
        // concurrent writers wait on the lock instead of failing with SQLITE_BUSY
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .await
            .map_err(db_err)?;
        Ok(conn)
    }
}

pub(crate) fn db_err(e: diesel::result::Error) -> WealthWiseError {
    WealthWiseError::Database(e.to_string())
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WealthWiseError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| WealthWiseError::Database(e.to_string()))?;
        conn.batch_execute("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| WealthWiseError::Database(e.to_string()))?;
        Ok::<_, WealthWiseError>(())
    })
    .await
    .map_err(|e| WealthWiseError::Runtime(e.to_string()))??;
    Ok(())
}
