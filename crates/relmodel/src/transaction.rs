//! Transactions and their propagation through execution contexts.
//!
//! A [`Transaction`] owns one pooled connection from `BEGIN` until `COMMIT`
//! or `ROLLBACK`. [`start_transaction`] publishes it into a child
//! [`ExecutionContext`] under [`TRANSACTION`], and every entity operation
//! handed that context (or a context spawned from it) runs its statements on
//! it through [`Transaction::current`].
//!
//! The state machine is `Begun -> Committed | RolledBack`; both end states
//! are terminal and the connection leaves the transaction when it gets there.

use crate::query::QueryEngine;
use relmodel_core::{
    BoxFuture, Connection, ConnectionPool, Cx, Error, ExecutionContext, Outcome,
    PooledConnection, Result, Row, SqlQuery, TransactionError, TransactionErrorKind, try_outcome,
    try_result,
};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Context key the active transaction is published under.
pub const TRANSACTION: &str = "transaction";

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Begun,
    Committed,
    RolledBack,
}

/// A unit of work on one exclusively owned connection.
pub struct Transaction {
    id: u64,
    engine: Arc<QueryEngine>,
    connection: Arc<dyn Connection>,
    pooled: Mutex<Option<PooledConnection>>,
    state: Mutex<TransactionState>,
}

impl Transaction {
    /// Issue `BEGIN` on `conn`. The connection is discarded if that fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn begin(
        cx: &Cx,
        conn: PooledConnection,
        engine: Arc<QueryEngine>,
    ) -> Outcome<Arc<Transaction>, Error> {
        let connection = conn.connection();
        match engine
            .execute(cx, &*connection, &SqlQuery::raw("BEGIN"))
            .await
        {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => {
                conn.discard();
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                conn.discard();
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                conn.discard();
                return Outcome::Panicked(p);
            }
        }

        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(transaction = id, "transaction begun");
        Outcome::Ok(Arc::new(Self {
            id,
            engine,
            connection,
            pooled: Mutex::new(Some(conn)),
            state: Mutex::new(TransactionState::Begun),
        }))
    }

    /// The transaction published in `ctx`.
    pub fn current(ctx: &ExecutionContext) -> Result<Arc<Transaction>> {
        ctx.get::<Transaction>(TRANSACTION).ok_or_else(|| {
            Error::transaction(
                TransactionErrorKind::NotActive,
                "No transaction is active in this execution context",
            )
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn state(&self) -> TransactionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, TransactionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            TransactionState::Begun => Ok(()),
            TransactionState::Committed => Err(Error::transaction(
                TransactionErrorKind::AlreadyCommitted,
                format!("Transaction {} has already been committed", self.id),
            )),
            TransactionState::RolledBack => Err(Error::transaction(
                TransactionErrorKind::AlreadyRolledBack,
                format!("Transaction {} has already been rolled back", self.id),
            )),
        }
    }

    /// Move to a terminal state and hand the connection back to its pool,
    /// or discard it when it may still hold an open transaction.
    fn finish(&self, state: TransactionState, reusable: bool) {
        *self.lock_state() = state;
        let pooled = self
            .pooled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(conn) = pooled {
            if reusable {
                conn.release();
            } else {
                conn.discard();
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(transaction = self.id))]
    pub async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.ensure_active());
        match self
            .engine
            .execute(cx, &*self.connection, &SqlQuery::raw("COMMIT"))
            .await
        {
            Outcome::Ok(_) => {
                self.finish(TransactionState::Committed, true);
                tracing::debug!(transaction = self.id, "transaction committed");
                Outcome::Ok(())
            }
            Outcome::Err(e) => {
                self.finish(TransactionState::RolledBack, false);
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                self.finish(TransactionState::RolledBack, false);
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                self.finish(TransactionState::RolledBack, false);
                Outcome::Panicked(p)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(transaction = self.id))]
    pub async fn rollback(&self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.ensure_active());
        let outcome = self
            .engine
            .execute(cx, &*self.connection, &SqlQuery::raw("ROLLBACK"))
            .await;
        let rolled_back = matches!(outcome, Outcome::Ok(_));
        self.finish(TransactionState::RolledBack, rolled_back);
        tracing::debug!(transaction = self.id, clean = rolled_back, "transaction rolled back");
        match outcome {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Roll back, logging instead of returning a failure.
    async fn abandon(&self, cx: &Cx) {
        if self.state() != TransactionState::Begun {
            return;
        }
        if let Outcome::Err(e) = self.rollback(cx).await {
            tracing::warn!(transaction = self.id, error = %e, "rollback failed");
        }
    }
}

/// Statements run on the transaction's connection while it is active.
impl Connection for Transaction {
    fn query<'a>(
        &'a self,
        cx: &'a Cx,
        query: &'a SqlQuery,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>> {
        Box::pin(async move {
            try_result!(self.ensure_active());
            self.connection.query(cx, query).await
        })
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state() == TransactionState::Begun {
            tracing::warn!(
                transaction = self.id,
                "transaction dropped while active; connection discarded"
            );
        }
    }
}

fn rolled_back(cause: Error) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::RolledBack,
        message: "Unit of work rolled back".to_string(),
        source: Some(Box::new(cause)),
    })
}

async fn checkout(cx: &Cx, pool: &dyn ConnectionPool) -> Outcome<PooledConnection, Error> {
    let outcome = pool.connect(cx).await;
    if let Outcome::Err(e) = &outcome {
        tracing::error!(error = %e, "connection checkout failed");
    }
    outcome
}

/// Run `unit_of_work` in a new transaction.
///
/// The unit of work receives a child of `ctx` with the transaction
/// published in it. Success commits; an error rolls back and comes back as
/// a `RolledBack` transaction error whose source is the original error.
/// Cancellation and panics roll back and propagate unchanged.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn start_transaction<T, F, Fut>(
    cx: &Cx,
    pool: &dyn ConnectionPool,
    engine: &Arc<QueryEngine>,
    ctx: &ExecutionContext,
    unit_of_work: F,
) -> Outcome<T, Error>
where
    F: FnOnce(ExecutionContext) -> Fut,
    Fut: Future<Output = Outcome<T, Error>>,
{
    let conn = try_outcome!(checkout(cx, pool).await);
    let tx = try_outcome!(Transaction::begin(cx, conn, Arc::clone(engine)).await);

    let child = ctx.spawn_child();
    child.publish(TRANSACTION, Arc::clone(&tx));

    match unit_of_work(child).await {
        Outcome::Ok(value) => {
            try_outcome!(tx.commit(cx).await);
            Outcome::Ok(value)
        }
        Outcome::Err(e) => {
            tracing::debug!(transaction = tx.id(), error = %e, "unit of work failed");
            tx.abandon(cx).await;
            Outcome::Err(rolled_back(e))
        }
        Outcome::Cancelled(r) => {
            tx.abandon(cx).await;
            Outcome::Cancelled(r)
        }
        Outcome::Panicked(p) => {
            tx.abandon(cx).await;
            Outcome::Panicked(p)
        }
    }
}

/// Begin a transaction whose outcome is decided by a response.
///
/// The caller runs its work on [`ResponseTransaction::context`] and closes
/// the transaction with [`finish`](ResponseTransaction::finish) or
/// [`fail`](ResponseTransaction::fail).
#[tracing::instrument(level = "debug", skip_all)]
pub async fn start_response_managed_transaction(
    cx: &Cx,
    pool: &dyn ConnectionPool,
    engine: &Arc<QueryEngine>,
    ctx: &ExecutionContext,
) -> Outcome<ResponseTransaction, Error> {
    let conn = try_outcome!(checkout(cx, pool).await);
    let tx = try_outcome!(Transaction::begin(cx, conn, Arc::clone(engine)).await);
    let context = ctx.spawn_child();
    context.publish(TRANSACTION, Arc::clone(&tx));
    Outcome::Ok(ResponseTransaction {
        tx,
        context,
        finished: false,
    })
}

/// A transaction closed by the status of the response it served.
pub struct ResponseTransaction {
    tx: Arc<Transaction>,
    context: ExecutionContext,
    finished: bool,
}

impl ResponseTransaction {
    /// Context the request's work runs on.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// Commit for a status below 400, roll back otherwise.
    pub async fn finish(mut self, cx: &Cx, status: u16) -> Outcome<(), Error> {
        self.finished = true;
        if status < 400 {
            self.tx.commit(cx).await
        } else {
            tracing::debug!(transaction = self.tx.id(), status, "error response");
            self.tx.rollback(cx).await
        }
    }

    /// Roll back after a failed request and return the failure wrapped.
    pub async fn fail(mut self, cx: &Cx, error: Error) -> Outcome<(), Error> {
        self.finished = true;
        self.tx.abandon(cx).await;
        Outcome::Err(rolled_back(error))
    }
}

impl fmt::Debug for ResponseTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseTransaction")
            .field("transaction", &self.tx)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for ResponseTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                transaction = self.tx.id(),
                "response transaction dropped without finish"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testing::{MockConnection, MockPool};
    use asupersync::runtime::RuntimeBuilder;
    use relmodel_core::ContextStore;
    use relmodel_query::Dialect;

    fn engine() -> Arc<QueryEngine> {
        let mut registry = Registry::new();
        registry.build().unwrap();
        Arc::new(QueryEngine::new(Arc::new(registry), Dialect::Postgres))
    }

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(value) => value,
            Outcome::Err(err) => panic!("unexpected error: {err}"),
            Outcome::Cancelled(reason) => panic!("cancelled: {reason:?}"),
            Outcome::Panicked(payload) => panic!("panicked: {payload:?}"),
        }
    }

    #[test]
    fn unit_of_work_sees_transaction_and_commits() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let pool = MockPool::new(conn.clone());
        let engine = engine();
        let store = ContextStore::new();
        let root = store.root();

        let id = rt.block_on(async {
            unwrap_outcome(
                start_transaction(&cx, &pool, &engine, &root, |ctx| async move {
                    let tx = match Transaction::current(&ctx) {
                        Ok(tx) => tx,
                        Err(e) => return Outcome::Err(e),
                    };
                    let grandchild = ctx.spawn_child();
                    let inherited = Transaction::current(&grandchild).map(|t| t.id());
                    assert_eq!(inherited.ok(), Some(tx.id()));
                    Outcome::Ok(tx.id())
                })
                .await,
            )
        });

        assert!(id > 0);
        assert_eq!(conn.executed_texts(), vec!["BEGIN", "COMMIT"]);
        assert_eq!(pool.released(), 1);
        assert_eq!(pool.discarded(), 0);
        assert!(!root.contains(TRANSACTION));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failure_rolls_back_and_wraps() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let pool = MockPool::new(conn.clone());
        let engine = engine();
        let store = ContextStore::new();
        let root = store.root();

        let outcome = rt.block_on(async {
            start_transaction(&cx, &pool, &engine, &root, |_ctx| async move {
                Outcome::<(), Error>::Err(Error::Record(relmodel_core::RecordError {
                    kind: relmodel_core::RecordErrorKind::NotFound,
                    model: "Teacher".into(),
                    key: "{}".into(),
                }))
            })
            .await
        });

        let Outcome::Err(err) = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(
            err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::RolledBack,
                ..
            })
        ));
        assert_eq!(err.http_status(), 404);
        assert_eq!(conn.executed_texts(), vec!["BEGIN", "ROLLBACK"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn terminal_states_reject_statements() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();

        rt.block_on(async {
            let tx = unwrap_outcome(
                Transaction::begin(
                    &cx,
                    PooledConnection::unpooled(Arc::new(conn.clone())),
                    engine(),
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);
            assert_eq!(tx.state(), TransactionState::Committed);

            let Outcome::Err(err) = tx.rollback(&cx).await else {
                panic!("rollback after commit must fail");
            };
            assert!(matches!(
                err,
                Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::AlreadyCommitted,
                    ..
                })
            ));

            let query = SqlQuery::raw("SELECT 1");
            assert!(matches!(tx.query(&cx, &query).await, Outcome::Err(_)));
        });
        assert_eq!(conn.executed_texts(), vec!["BEGIN", "COMMIT"]);
    }

    #[test]
    fn no_transaction_outside_a_unit_of_work() {
        let store = ContextStore::new();
        let root = store.root();
        let err = Transaction::current(&root).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                ..
            })
        ));
    }

    #[test]
    fn response_status_decides_outcome() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let pool = MockPool::new(conn.clone());
        let engine = engine();
        let store = ContextStore::new();
        let root = store.root();

        rt.block_on(async {
            let ok = unwrap_outcome(
                start_response_managed_transaction(&cx, &pool, &engine, &root).await,
            );
            assert!(Transaction::current(ok.context()).is_ok());
            unwrap_outcome(ok.finish(&cx, 201).await);

            let bad = unwrap_outcome(
                start_response_managed_transaction(&cx, &pool, &engine, &root).await,
            );
            unwrap_outcome(bad.finish(&cx, 404).await);

            let failed = unwrap_outcome(
                start_response_managed_transaction(&cx, &pool, &engine, &root).await,
            );
            let outcome = failed
                .fail(&cx, Error::Custom("handler failed".into()))
                .await;
            assert!(matches!(outcome, Outcome::Err(Error::Transaction(_))));
        });

        assert_eq!(
            conn.executed_texts(),
            vec!["BEGIN", "COMMIT", "BEGIN", "ROLLBACK", "BEGIN", "ROLLBACK"]
        );
        assert_eq!(pool.released(), 3);
    }
}
