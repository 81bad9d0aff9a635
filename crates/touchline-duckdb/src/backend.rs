use std::sync::Arc;

use anyhow::Result;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use touchline_core::channel::SourceCategories;

use crate::schema::init_sql;

/// A DuckDB backend for touchline.
///
/// DuckDB is single-writer. The connection sits behind `Arc<Mutex<_>>` so
/// every write is serialised through one lock while the struct stays cheap
/// to share.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    /// Creates all tables if needed and seeds `source_categories` with the
    /// built-in source list when it is empty.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::prepare_sync(&conn, memory_limit)?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare_sync(&conn, "1GB")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn prepare_sync(conn: &Connection, memory_limit: &str) -> Result<()> {
        conn.execute_batch(&init_sql(memory_limit))?;
        Self::seed_source_categories_sync(conn)?;
        Ok(())
    }

    /// Fill `source_categories` with [`SourceCategories::builtin`] on a fresh
    /// database. A table that already holds rows is left alone, so a list
    /// imported by the user is never overwritten.
    fn seed_source_categories_sync(conn: &Connection) -> Result<()> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM source_categories", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }
        let mut stmt = conn
            .prepare("INSERT OR IGNORE INTO source_categories (source, category) VALUES (?1, ?2)")?;
        for (source, category) in SourceCategories::builtin().pairs() {
            stmt.execute(duckdb::params![source, category])?;
        }
        Ok(())
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
