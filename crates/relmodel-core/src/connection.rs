//! Database driver boundary.
//!
//! The ORM consumes a driver through two object-safe traits:
//!
//! - [`ConnectionPool`] - hands out [`PooledConnection`]s and is closed on shutdown
//! - [`Connection`] - executes one rendered [`SqlQuery`] and returns its rows
//!
//! Futures are boxed so both traits can live behind `Arc<dyn ...>`. All
//! operations take a `Cx` for cancellation.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future used across the driver boundary.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Rendered SQL text with its ordered parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlQuery {
    pub text: String,
    pub values: Vec<Value>,
}

impl SqlQuery {
    pub fn new(text: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            values,
        }
    }

    /// A statement without parameters.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A database connection capable of executing rendered queries.
///
/// Statements issued on one connection run in program order.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows (empty for statements without
    /// a result set).
    fn query<'a>(
        &'a self,
        cx: &'a Cx,
        query: &'a SqlQuery,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>>;
}

/// A source of pooled connections.
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection. It stays exclusively owned until released.
    fn connect<'a>(&'a self, cx: &'a Cx) -> BoxFuture<'a, Outcome<PooledConnection, Error>>;

    /// Close the pool. Idle connections are dropped; connections still
    /// checked out are discarded when they come back.
    fn close<'a>(&'a self, cx: &'a Cx) -> BoxFuture<'a, Outcome<(), Error>>;
}

/// Callback a pool installs to get a connection back.
///
/// The flag is `true` when the connection is clean and may be reused.
pub type ReleaseFn = Box<dyn FnOnce(bool) + Send + Sync>;

/// A connection checked out of a [`ConnectionPool`].
///
/// [`release`](Self::release) hands it back for reuse. Dropping it without
/// releasing discards it instead, since it may still hold an open transaction.
pub struct PooledConnection {
    conn: Arc<dyn Connection>,
    on_release: Option<ReleaseFn>,
}

impl PooledConnection {
    /// Wrap a checked-out connection with the pool's release callback.
    pub fn new(conn: Arc<dyn Connection>, on_release: ReleaseFn) -> Self {
        Self {
            conn,
            on_release: Some(on_release),
        }
    }

    /// Wrap a connection that belongs to no pool.
    pub fn unpooled(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            on_release: None,
        }
    }

    /// Shared handle to the underlying connection.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.conn)
    }

    /// Return the connection to its pool for reuse.
    pub fn release(mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release(true);
        }
    }

    /// Return the connection to its pool marked as unusable.
    pub fn discard(mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release(false);
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pooled", &self.on_release.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            tracing::debug!("pooled connection dropped without release; discarding");
            on_release(false);
        }
    }
}
