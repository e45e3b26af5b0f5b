//! SQLite driver for relmodel.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a SQLite database driver on top of `libsqlite3-sys`
//! (bundled). It implements the `Connection` trait from relmodel-core and a
//! `ConnectionFactory` for the generic pool in relmodel-pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmodel_sqlite::{SqliteConfig, pool};
//! use relmodel_pool::PoolConfig;
//!
//! let pool = pool(SqliteConfig::file("app.db"), PoolConfig::new(4));
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Null`, `Default` | NULL |
//! | `Timestamp` | TEXT (ISO-8601) |
//! | `Json` | TEXT |

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{SqliteConfig, SqliteConnection, SqliteFactory, SqlitePool, pool};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
