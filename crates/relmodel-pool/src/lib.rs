//! Connection pooling for relmodel using asupersync.
//!
//! [`Pool`] is generic over a [`ConnectionFactory`] that opens new driver
//! connections. Checked-out connections come back through the release
//! callback of [`PooledConnection`]: clean ones are kept idle for reuse,
//! discarded ones are dropped and free their slot.
//!
//! Checkout never waits. When `max_connections` are already open and none is
//! idle, [`ConnectionPool::connect`] fails with [`PoolErrorKind::Exhausted`].

use asupersync::{Cx, Outcome};
use relmodel_core::{
    BoxFuture, Connection, ConnectionPool, Error, PoolError, PoolErrorKind, PooledConnection,
    SqlQuery,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened by [`Pool::warm_up`]
    pub min_connections: usize,
    /// Maximum number of connections allowed
    pub max_connections: usize,
    /// Validate idle connections with `SELECT 1` before giving them out
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            test_on_checkout: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    /// Set minimum connections.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    /// Enable/disable test on checkout.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of active connections
    pub active_connections: usize,
    /// Connections opened over the pool's lifetime
    pub connections_created: u64,
    /// Successful checkouts over the pool's lifetime
    pub acquires: u64,
}

/// Opens new driver connections for a [`Pool`].
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection + 'static;

    fn connect<'a>(&'a self, cx: &'a Cx) -> BoxFuture<'a, Outcome<Self::Connection, Error>>;
}

struct State<C> {
    idle: Vec<Arc<C>>,
    active: usize,
    closed: bool,
    connections_created: u64,
    acquires: u64,
}

struct Shared<C> {
    state: Mutex<State<C>>,
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn give_back(&self, conn: Arc<C>, reusable: bool) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        if reusable && !state.closed {
            state.idle.push(conn);
        } else {
            tracing::debug!(reusable, closed = state.closed, "dropping returned connection");
        }
    }
}

/// A connection pool over connections opened by `F`.
pub struct Pool<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    shared: Arc<Shared<F::Connection>>,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new connection pool. No connection is opened yet.
    pub fn new(config: PoolConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    idle: Vec::new(),
                    active: 0,
                    closed: false,
                    connections_created: 0,
                    acquires: 0,
                }),
            }),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            total_connections: state.active + state.idle.len(),
            idle_connections: state.idle.len(),
            active_connections: state.active,
            connections_created: state.connections_created,
            acquires: state.acquires,
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        let state = self.shared.lock();
        state.active + state.idle.len() >= self.config.max_connections
    }

    /// Open connections until `min_connections` are idle or open.
    pub async fn warm_up(&self, cx: &Cx) -> Outcome<(), Error> {
        loop {
            {
                let state = self.shared.lock();
                if state.closed
                    || state.active + state.idle.len()
                        >= self.config.min_connections.min(self.config.max_connections)
                {
                    return Outcome::Ok(());
                }
            }
            let conn = match self.open(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let mut state = self.shared.lock();
            state.connections_created += 1;
            state.idle.push(Arc::new(conn));
        }
    }

    async fn open(&self, cx: &Cx) -> Outcome<F::Connection, Error> {
        match self.factory.connect(cx).await {
            Outcome::Err(e) => {
                tracing::error!(error = %e, "failed to open pooled connection");
                Outcome::Err(e)
            }
            other => other,
        }
    }

    fn wrap(&self, conn: Arc<F::Connection>) -> PooledConnection {
        let shared = Arc::clone(&self.shared);
        let handle: Arc<dyn Connection> = conn.clone();
        PooledConnection::new(
            handle,
            Box::new(move |reusable| shared.give_back(conn, reusable)),
        )
    }

    /// Take an idle connection, or reserve a slot for a new one.
    fn checkout(&self) -> Result<Option<Arc<F::Connection>>, Error> {
        let mut state = self.shared.lock();
        if state.closed {
            tracing::error!("connection requested from a closed pool");
            return Err(pool_error(PoolErrorKind::Closed, "pool is closed"));
        }
        if let Some(conn) = state.idle.pop() {
            state.active += 1;
            return Ok(Some(conn));
        }
        if state.active >= self.config.max_connections {
            tracing::error!(
                max_connections = self.config.max_connections,
                "connection pool exhausted"
            );
            return Err(pool_error(
                PoolErrorKind::Exhausted,
                format!(
                    "all {} connections are in use",
                    self.config.max_connections
                ),
            ));
        }
        state.active += 1;
        Ok(None)
    }

    async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection, Error> {
        loop {
            let idle = match self.checkout() {
                Ok(idle) => idle,
                Err(e) => return Outcome::Err(e),
            };

            let Some(conn) = idle else {
                let opened = self.open(cx).await;
                let mut state = self.shared.lock();
                let result = match opened {
                    Outcome::Ok(conn) => {
                        state.connections_created += 1;
                        state.acquires += 1;
                        return Outcome::Ok(self.wrap(Arc::new(conn)));
                    }
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
                state.active = state.active.saturating_sub(1);
                return result;
            };

            if self.config.test_on_checkout {
                match conn.query(cx, &SqlQuery::raw("SELECT 1")).await {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => {
                        tracing::warn!(error = %e, "idle connection failed validation; discarding");
                        self.shared.give_back(conn, false);
                        continue;
                    }
                    Outcome::Cancelled(r) => {
                        self.shared.give_back(conn, true);
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => {
                        self.shared.give_back(conn, false);
                        return Outcome::Panicked(p);
                    }
                }
            }

            self.shared.lock().acquires += 1;
            return Outcome::Ok(self.wrap(conn));
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool for Pool<F> {
    fn connect<'a>(&'a self, cx: &'a Cx) -> BoxFuture<'a, Outcome<PooledConnection, Error>> {
        Box::pin(self.acquire(cx))
    }

    fn close<'a>(&'a self, _cx: &'a Cx) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let mut state = self.shared.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            tracing::debug!(
                idle = idle.len(),
                active = state.active,
                "connection pool closed"
            );
            Outcome::Ok(())
        })
    }
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
        source: None,
    })
}
