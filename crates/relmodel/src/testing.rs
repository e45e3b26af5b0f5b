//! In-memory doubles for connections and pools.

use relmodel_core::{
    BoxFuture, Connection, ConnectionPool, Cx, Error, Outcome, PooledConnection, Row, SqlQuery,
    Value,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    executed: Vec<SqlQuery>,
    responses: VecDeque<Vec<Row>>,
    next_id: i64,
}

/// Records every statement and answers from a script.
///
/// `SELECT`s pop the next scripted result set (empty when none is left).
/// `INSERT`s pop one too if queued, otherwise they return one generated
/// `id` row per inserted tuple. Everything else returns no rows.
#[derive(Clone, Default)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.state().responses.push_back(rows);
    }

    pub(crate) fn executed(&self) -> Vec<SqlQuery> {
        self.state().executed.clone()
    }

    pub(crate) fn executed_texts(&self) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .map(|q| q.text.clone())
            .collect()
    }

    fn respond(&self, query: &SqlQuery) -> Vec<Row> {
        let mut state = self.state();
        state.executed.push(query.clone());
        let text = query.text.trim_start();
        if text.starts_with("SELECT") {
            return state.responses.pop_front().unwrap_or_default();
        }
        if !text.starts_with("INSERT") {
            return Vec::new();
        }
        if let Some(rows) = state.responses.pop_front() {
            return rows;
        }
        let tuples = if text.contains("DEFAULT VALUES") {
            1
        } else {
            text.matches("), (").count() + 1
        };
        (0..tuples)
            .map(|_| {
                state.next_id += 1;
                Row::new(vec!["id".into()], vec![Value::BigInt(state.next_id)])
            })
            .collect()
    }
}

impl Connection for MockConnection {
    fn query<'a>(
        &'a self,
        _cx: &'a Cx,
        query: &'a SqlQuery,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>> {
        let rows = self.respond(query);
        Box::pin(async move { Outcome::Ok(rows) })
    }
}

/// Hands out the same [`MockConnection`] and counts releases.
pub(crate) struct MockPool {
    conn: MockConnection,
    released: Arc<AtomicUsize>,
    discarded: Arc<AtomicUsize>,
}

impl MockPool {
    pub(crate) fn new(conn: MockConnection) -> Self {
        Self {
            conn,
            released: Arc::new(AtomicUsize::new(0)),
            discarded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for MockPool {
    fn connect<'a>(&'a self, _cx: &'a Cx) -> BoxFuture<'a, Outcome<PooledConnection, Error>> {
        let released = Arc::clone(&self.released);
        let discarded = Arc::clone(&self.discarded);
        let conn = PooledConnection::new(
            Arc::new(self.conn.clone()),
            Box::new(move |reusable| {
                if reusable {
                    released.fetch_add(1, Ordering::SeqCst);
                } else {
                    discarded.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        Box::pin(async move { Outcome::Ok(conn) })
    }

    fn close<'a>(&'a self, _cx: &'a Cx) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async { Outcome::Ok(()) })
    }
}
