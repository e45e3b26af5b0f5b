//! SQLite connection implementation.
//!
//! This module provides a safe wrapper around SQLite's C API and implements
//! the `Connection` trait from relmodel-core. Statements run synchronously
//! under the connection's mutex; the returned future is already complete.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use asupersync::{Cx, Outcome};
use relmodel_core::{
    BoxFuture, ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Error, QueryError,
    QueryErrorKind, Row, SqlQuery, Value,
};
use relmodel_pool::{ConnectionFactory, Pool, PoolConfig};
use serde::{Deserialize, Serialize};
use std::ffi::{CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Enforce foreign key constraints (`PRAGMA foreign_keys = ON`).
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a new config for an in-memory database.
    ///
    /// Every connection opened from it gets its own private database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Enable/disable foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

/// Inner state of the SQLite connection, protected by a mutex.
struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is opened in serialized mode and every access goes
// through the owning Mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| connect_error("Invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE
            | ffi::SQLITE_OPEN_CREATE
            | ffi::SQLITE_OPEN_URI
            | ffi::SQLITE_OPEN_FULLMUTEX;

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe {
            libsqlite3_sys::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null())
        };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a handle returned by open_v2, closed right after
                unsafe {
                    let msg = ffi::errmsg(db);
                    libsqlite3_sys::sqlite3_close(db);
                    msg
                }
            };
            let err = connect_error(format!("Failed to open database: {msg}"));
            tracing::error!(path = %config.path, error = %err, "sqlite open failed");
            return Err(err);
        }

        if config.busy_timeout_ms > 0 {
            let timeout = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                libsqlite3_sys::sqlite3_busy_timeout(db, timeout);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
        };

        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(path = %config.path, "sqlite connection opened");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Execute a parameterless statement, discarding any rows.
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        self.query_sync(sql, &[]).map(|_| ())
    }

    /// Number of rows changed by the last statement.
    pub fn changes(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        i64::from(unsafe { libsqlite3_sys::sqlite3_changes(inner.db) })
    }

    /// Prepare and execute a query, returning all rows.
    pub fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;

        for (i, param) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.raw, index, param) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(inner.db, sql, i + 1, rc));
            }
        }

        // SAFETY: stmt is valid
        let col_count = unsafe { libsqlite3_sys::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            .map(|i| {
                // SAFETY: stmt is valid, i is in range
                unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}"))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { libsqlite3_sys::sqlite3_step(stmt.raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }

        tracing::trace!(sql, rows = rows.len(), "sqlite statement finished");
        Ok(rows)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statement outlives the lock
            unsafe {
                libsqlite3_sys::sqlite3_close(inner.db);
            }
        }
    }
}

impl Connection for SqliteConnection {
    fn query<'a>(
        &'a self,
        _cx: &'a Cx,
        query: &'a SqlQuery,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>> {
        let result = self.query_sync(&query.text, &query.values);
        Box::pin(async move { result.map_or_else(Outcome::Err, Outcome::Ok) })
    }
}

/// A prepared statement finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, Error> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "SQL contains null byte".to_string(),
                source: None,
            })
        })?;
        let len = c_int::try_from(c_sql.as_bytes().len()).unwrap_or(c_int::MAX);

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: All pointers are valid
        let rc = unsafe {
            libsqlite3_sys::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut stmt, ptr::null_mut())
        };

        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }
        Ok(Self { raw: stmt })
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw came from prepare_v2 and is finalized exactly once
            unsafe {
                libsqlite3_sys::sqlite3_finalize(self.raw);
            }
        }
    }
}

fn connect_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: None,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize, rc: c_int) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { ffi::errmsg(db) };
    Error::Query(QueryError {
        kind: error_code_to_kind(rc, &msg),
        sql: Some(sql.to_string()),
        message: format!("Failed to bind parameter {param_index}: {msg}"),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (ffi::errmsg(db), ffi::errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code, &msg),
        sql: Some(sql.to_string()),
        message: msg,
        source: None,
    })
}

fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR if message.contains("syntax error") => QueryErrorKind::Syntax,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}

/// Opens [`SqliteConnection`]s for a [`Pool`].
#[derive(Debug, Clone, Default)]
pub struct SqliteFactory {
    config: SqliteConfig,
}

impl SqliteFactory {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteConnection;

    fn connect<'a>(&'a self, _cx: &'a Cx) -> BoxFuture<'a, Outcome<SqliteConnection, Error>> {
        let result = SqliteConnection::open(&self.config);
        Box::pin(async move { result.map_or_else(Outcome::Err, Outcome::Ok) })
    }
}

/// A connection pool over SQLite connections.
pub type SqlitePool = Pool<SqliteFactory>;

/// Build a pool opening connections from `config`.
pub fn pool(config: SqliteConfig, pool_config: PoolConfig) -> SqlitePool {
    Pool::new(pool_config, SqliteFactory::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use relmodel_core::ConnectionPool;

    fn memory() -> SqliteConnection {
        SqliteConnection::open_memory().expect("open in-memory database")
    }

    fn query_error_kind(err: &Error) -> QueryErrorKind {
        match err {
            Error::Query(q) => q.kind,
            other => panic!("expected a query error, got {other}"),
        }
    }

    #[test]
    fn test_round_trip_with_returning() {
        let conn = memory();
        conn.execute_raw("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")
            .unwrap();

        let rows = conn
            .query_sync(
                "INSERT INTO t (name) VALUES (?1), (?2) RETURNING id",
                &[Value::from("a"), Value::from("b")],
            )
            .unwrap();
        let ids: Vec<i64> = rows
            .iter()
            .map(|row| row.get_named::<i64>("id").unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(conn.changes(), 2);

        let rows = conn
            .query_sync("SELECT name FROM t WHERE id = ?1", &[Value::BigInt(2)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("b")));
    }

    #[test]
    fn test_drop_closes_file_database() {
        let path = std::env::temp_dir().join(format!("relmodel-close-{}.db", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        let _ = std::fs::remove_file(&path);

        {
            let conn = SqliteConnection::open(&SqliteConfig::file(path.clone())).unwrap();
            conn.execute_raw("CREATE TABLE t (name TEXT)").unwrap();
            conn.query_sync("INSERT INTO t (name) VALUES (?1)", &[Value::from("kept")])
                .unwrap();
        }

        let conn = SqliteConnection::open(&SqliteConfig::file(path.clone())).unwrap();
        let rows = conn.query_sync("SELECT name FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("kept")));
        drop(conn);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_value_decoding() {
        let conn = memory();
        let rows = conn
            .query_sync(
                "SELECT 1 AS small, 5000000000 AS big, 1.5 AS real, NULL AS none_value, x'0102' AS blob",
                &[],
            )
            .unwrap();
        let row = &rows[0];
        assert_eq!(row.get_by_name("small"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("big"), Some(&Value::BigInt(5_000_000_000)));
        assert_eq!(row.get_by_name("real"), Some(&Value::Double(1.5)));
        assert_eq!(row.get_by_name("none_value"), Some(&Value::Null));
        assert_eq!(row.get_by_name("blob"), Some(&Value::Bytes(vec![1, 2])));
    }

    #[test]
    fn test_bool_and_json_binding() {
        let conn = memory();
        let rows = conn
            .query_sync(
                "SELECT ?1 AS flag, ?2 AS doc",
                &[Value::Bool(true), Value::Json(serde_json::json!({"a": 1}))],
            )
            .unwrap();
        assert_eq!(rows[0].get_by_name("flag"), Some(&Value::Int(1)));
        assert_eq!(
            rows[0].get_by_name("doc"),
            Some(&Value::from("{\"a\":1}"))
        );
    }

    #[test]
    fn test_error_mapping() {
        let conn = memory();
        let err = conn.query_sync("SELEC 1", &[]).unwrap_err();
        assert_eq!(query_error_kind(&err), QueryErrorKind::Syntax);
        assert_eq!(err.sql(), Some("SELEC 1"));

        let err = conn.query_sync("SELECT * FROM missing", &[]).unwrap_err();
        assert_eq!(query_error_kind(&err), QueryErrorKind::NotFound);

        conn.execute_raw("CREATE TABLE u (id INTEGER PRIMARY KEY, email TEXT UNIQUE)")
            .unwrap();
        conn.execute_raw("INSERT INTO u (email) VALUES ('a@b')").unwrap();
        let err = conn
            .execute_raw("INSERT INTO u (email) VALUES ('a@b')")
            .unwrap_err();
        assert_eq!(query_error_kind(&err), QueryErrorKind::Constraint);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = memory();
        conn.execute_raw("CREATE TABLE p (id INTEGER PRIMARY KEY)").unwrap();
        conn.execute_raw(
            "CREATE TABLE c (id INTEGER PRIMARY KEY, p_id INTEGER NOT NULL REFERENCES p(id) ON DELETE CASCADE)",
        )
        .unwrap();
        let err = conn
            .execute_raw("INSERT INTO c (p_id) VALUES (42)")
            .unwrap_err();
        assert_eq!(query_error_kind(&err), QueryErrorKind::Constraint);

        conn.execute_raw("INSERT INTO p (id) VALUES (1)").unwrap();
        conn.execute_raw("INSERT INTO c (p_id) VALUES (1)").unwrap();
        conn.execute_raw("DELETE FROM p").unwrap();
        let rows = conn.query_sync("SELECT COUNT(*) AS n FROM c", &[]).unwrap();
        assert_eq!(rows[0].get_named::<i64>("n").unwrap(), 0);
    }

    #[test]
    fn test_config_serde() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"path": "app.db", "foreign_keys": false}"#).unwrap();
        assert_eq!(config.path, "app.db");
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(!config.foreign_keys);
        assert_eq!(SqliteConfig::file("x.db").busy_timeout(10).busy_timeout_ms, 10);
    }

    #[test]
    fn test_pool_hands_out_working_connections() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let pool = pool(SqliteConfig::memory(), PoolConfig::new(1));

        rt.block_on(async {
            let Outcome::Ok(conn) = pool.connect(&cx).await else {
                panic!("connect failed");
            };
            let query = SqlQuery::raw("SELECT 7 AS seven");
            let Outcome::Ok(rows) = conn.query(&cx, &query).await else {
                panic!("query failed");
            };
            assert_eq!(rows[0].get_named::<i64>("seven").unwrap(), 7);
            conn.release();
        });

        assert_eq!(pool.stats().idle_connections, 1);
    }
}
