//! StatsBase - DuckDB-based statistics engine behind the bridge.

use anyhow::{Context, Result};
use duckdb::types::Value;
use duckdb::{params, Config, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use pgscale_core::executor::{ExecutorError, QueryExecutor};
use pgscale_core::result_set::ResultSet;

use super::cells;
use super::schema::{SCHEMA_SQL, SCHEMA_VERSION};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write mode: schema and built-in views are installed on open
    #[default]
    ReadWrite,
    /// Read-only mode: attach to a database another process maintains
    ReadOnly,
}

/// StatsBase - the host data engine queried by the bridge.
pub struct StatsBase {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl StatsBase {
    /// Open or create a database file in read-write mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadWrite)
    }

    /// Open an existing database file in read-only mode.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadOnly)
    }

    /// Open a database file with the specified access mode.
    pub fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();

        let conn = match mode {
            AccessMode::ReadWrite => Connection::open(path)
                .with_context(|| format!("Failed to open database: {:?}", path))?,
            AccessMode::ReadOnly => {
                let config = Config::default()
                    .access_mode(duckdb::AccessMode::ReadOnly)
                    .map_err(|e| anyhow::anyhow!("Failed to set read-only mode: {}", e))?;
                Connection::open_with_flags(path, config).with_context(|| {
                    format!("Failed to open database in read-only mode: {:?}", path)
                })?
            }
        };

        let stats = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };

        if mode == AccessMode::ReadWrite {
            stats.init_schema()?;
        }

        Ok(stats)
    }

    /// Open a private in-memory database with the bridge schema installed.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let stats = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        stats.init_schema()?;
        Ok(stats)
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquire the connection lock. A poisoned mutex only means an earlier
    /// holder panicked; the connection itself is still usable.
    fn acquire_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering from poisoned database mutex");
                poisoned.into_inner()
            }
        }
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.acquire_conn();

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;

        conn.execute(
            "INSERT OR REPLACE INTO pgscale_metadata (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )
        .context("Failed to set schema version")?;

        Ok(())
    }

    /// Run a batch of statements, e.g. to create or refresh host tables.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.acquire_conn();
        conn.execute_batch(sql).context("Failed to execute batch")
    }

    /// Run every statement in an SQL file.
    pub fn load_sql_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file: {:?}", path))?;
        self.execute_batch(&sql)
            .with_context(|| format!("Failed to load SQL file: {:?}", path))
    }

    /// Run one query inside its own transaction and materialize the rows.
    ///
    /// Failing to begin or commit the transaction leaves the engine in an
    /// unknown state and is reported as fatal; everything else only fails
    /// this query.
    pub fn query(&self, sql: &str) -> std::result::Result<ResultSet, ExecutorError> {
        let mut conn = self.acquire_conn();
        let tx = conn
            .transaction()
            .map_err(|e| ExecutorError::Fatal(format!("failed to begin transaction: {}", e)))?;

        match collect_rows(&tx, sql) {
            Ok(result) => {
                tx.commit().map_err(|e| {
                    ExecutorError::Fatal(format!("failed to commit transaction: {}", e))
                })?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!("Rollback after failed query also failed: {}", rollback);
                }
                Err(ExecutorError::Query(format!("{:#}", e)))
            }
        }
    }
}

impl QueryExecutor for StatsBase {
    fn execute(&self, query: &str) -> std::result::Result<ResultSet, ExecutorError> {
        self.query(query)
    }
}

fn collect_rows(conn: &Connection, sql: &str) -> Result<ResultSet> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Failed to prepare query: {}", sql))?;
    let mut rows = stmt.query([]).context("Failed to execute query")?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows_data: Vec<Vec<String>> = Vec::new();

    while let Some(row) = rows.next()? {
        // Column names come from the executed statement behind the first row
        if columns.is_empty() {
            columns = row
                .as_ref()
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();
        }

        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: Value = row.get(i)?;
            cells.push(cells::render(value));
        }
        rows_data.push(cells);
    }
    drop(rows);

    // No rows to read names from; the executed statement still has them
    if columns.is_empty() {
        columns = stmt.column_names();
    }

    Ok(ResultSet::from_parts(columns, rows_data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BUILTIN_VIEWS;
    use tempfile::tempdir;

    fn seeded() -> StatsBase {
        let db = StatsBase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE connections (pid INTEGER, state VARCHAR);
             INSERT INTO connections VALUES (1, 'active'), (2, 'idle');",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_query_columns_and_rows() {
        let db = seeded();
        let result = db.query("select * from connections").unwrap();

        assert_eq!(result.columns(), ["pid", "state"]);
        assert_eq!(
            result.rows(),
            [vec!["1", "active"], vec!["2", "idle"]]
                .map(|row| row.into_iter().map(String::from).collect::<Vec<_>>())
        );
    }

    #[test]
    fn test_query_renders_cells_as_text() {
        let db = seeded();
        let result = db
            .query(
                "SELECT 42::INTEGER AS i, 1.5::DOUBLE AS f, true AS b, NULL AS n,
                        TIMESTAMP '2024-01-02 03:04:05' AS ts, DATE '2024-01-02' AS d",
            )
            .unwrap();

        assert_eq!(result.columns(), ["i", "f", "b", "n", "ts", "d"]);
        assert_eq!(
            result.rows()[0],
            ["42", "1.5", "true", "null", "2024-01-02 03:04:05", "2024-01-02"]
        );
    }

    #[test]
    fn test_query_empty_table() {
        let db = seeded();
        db.execute_batch("CREATE TABLE idle_sessions (pid INTEGER)")
            .unwrap();
        let result = db.query("select * from idle_sessions").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns(), ["pid"]);

        let filtered = db
            .query("select pid, state from connections where pid > 100")
            .unwrap();
        assert_eq!(filtered.row_count(), 0);
        assert_eq!(filtered.columns(), ["pid", "state"]);
    }

    #[test]
    fn test_missing_table_is_not_fatal() {
        let db = seeded();
        let err = db.query("select * from nope").unwrap_err();
        assert!(!err.is_fatal(), "unexpected fatal error: {}", err);

        // The connection is still usable afterwards.
        assert_eq!(db.query("select * from connections").unwrap().row_count(), 2);
    }

    #[test]
    fn test_builtin_views() {
        let db = seeded();

        let tables = db.query("select * from pgscale_tables").unwrap();
        assert_eq!(
            tables.columns(),
            ["schema_name", "table_name", "estimated_size", "column_count"]
        );
        assert!(tables
            .rows()
            .iter()
            .any(|row| row[1] == "connections" && row[3] == "2"));

        let settings = db.query("select * from pgscale_settings").unwrap();
        assert_eq!(settings.columns(), ["name", "value", "description"]);
        assert!(!settings.is_empty());

        for view in BUILTIN_VIEWS {
            db.query(&format!("select * from {}", view)).unwrap();
        }
    }

    #[test]
    fn test_schema_version_recorded() {
        let db = StatsBase::open_in_memory().unwrap();
        let result = db
            .query("select value from pgscale_metadata where key = 'schema_version'")
            .unwrap();
        assert_eq!(result.rows()[0][0], SCHEMA_VERSION);
    }

    #[test]
    fn test_read_only_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("stats.duckdb");

        {
            let db = StatsBase::open(&db_path).unwrap();
            db.execute_batch("CREATE TABLE activity (pid INTEGER); INSERT INTO activity VALUES (7);")
                .unwrap();
            assert_eq!(db.path(), Some(db_path.as_path()));
        }

        let db = StatsBase::open_read_only(&db_path).unwrap();
        let result = db.query("select * from activity").unwrap();
        assert_eq!(result.rows()[0][0], "7");
        assert!(db.execute_batch("INSERT INTO activity VALUES (8)").is_err());
    }

    #[test]
    fn test_load_sql_file() {
        let dir = tempdir().unwrap();
        let seed = dir.path().join("seed.sql");
        std::fs::write(
            &seed,
            "CREATE TABLE locks (mode VARCHAR); INSERT INTO locks VALUES ('share');",
        )
        .unwrap();

        let db = StatsBase::open_in_memory().unwrap();
        db.load_sql_file(&seed).unwrap();
        assert_eq!(db.query("select * from locks").unwrap().rows()[0][0], "share");

        assert!(db.load_sql_file(dir.path().join("missing.sql")).is_err());
    }
}
