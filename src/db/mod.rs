//! Data source abstraction and the SQLite implementation.
//!
//! Every call opens its own read-only connection, runs exactly one statement
//! and releases the connection on every exit path.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// One result row, keyed by column name in select order.
pub type Row = Map<String, Value>;

/// Executes a single read statement and returns its rows.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run `sql` with positional text parameters.
    async fn query(&self, sql: &str, params: &[String]) -> Result<Vec<Row>>;
}

/// SQLite-backed data source.
#[derive(Debug, Clone)]
pub struct SqliteDataSource {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn run(&self, sql: &str, params: &[String]) -> Result<Vec<Row>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

#[async_trait]
impl DataSource for SqliteDataSource {
    async fn query(&self, sql: &str, params: &[String]) -> Result<Vec<Row>> {
        let source = self.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        debug!("Executing query against {}", source.path.display());

        tokio::task::spawn_blocking(move || source.run(&sql, &params))
            .await
            .map_err(|e| Error::Internal(format!("Query task failed: {}", e)))?
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("0x{}", hex::encode(b))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    /// A small catalog with a foreign key, an example query table and a blob.
    pub fn sample_database() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE customers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT
            );
            CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL REFERENCES customers(id),
                total REAL,
                receipt BLOB
            );
            CREATE TABLE example_queries (
                id INTEGER PRIMARY KEY,
                question TEXT NOT NULL,
                sql_query TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO customers (id, name, email) VALUES (1, 'Alice', 'alice@example.com');
            INSERT INTO customers (id, name, email) VALUES (2, 'Bob', NULL);
            INSERT INTO orders (id, customer_id, total, receipt) VALUES (10, 1, 19.5, x'CAFE');
            INSERT INTO example_queries (question, sql_query, priority)
                VALUES ('How many customers?', 'SELECT COUNT(*) FROM customers', 1);
            INSERT INTO example_queries (question, sql_query, priority)
                VALUES ('Hidden', 'SELECT 1', 0);
            "#,
        )
        .unwrap();
        file
    }
}
