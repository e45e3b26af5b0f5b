//! Core types and traits for relmodel.
//!
//! This crate provides the foundations shared by the renderer, the drivers
//! and the ORM layer:
//!
//! - `Value` and `Row` for dynamically-typed data
//! - `Error` taxonomy and `Result` alias
//! - `Connection` / `ConnectionPool` driver boundary
//! - `ExecutionContext` per-call-chain key/value bags
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod context;
pub mod error;
pub mod identifiers;
pub mod outcome;
pub mod row;
pub mod value;

pub use connection::{
    BoxFuture, Connection, ConnectionPool, PooledConnection, ReleaseFn, SqlQuery,
};
pub use context::{ChainId, ContextStore, ContextValue, ExecutionContext};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, PoolError, PoolErrorKind,
    QueryError, QueryErrorKind, RecordError, RecordErrorKind, ResolutionError,
    ResolutionErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use identifiers::{quote_ident, quote_path};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
