//! Table descriptors and SQL rendering for relmodel.
//!
//! `relmodel-query` is the **rendering layer**. The ORM hands it one [`Table`]
//! per model and receives [`SqlQuery`](relmodel_core::SqlQuery) values back:
//!
//! - **DDL**: `CREATE TABLE IF NOT EXISTS`, `DROP TABLE IF EXISTS`, index
//!   creation and removal.
//! - **DML**: [`Select`] with aliased LEFT JOINs and COUNT, [`Insert`] with
//!   multi-row `DEFAULT` cells and `RETURNING`, [`Update`], [`Delete`].
//! - **Introspection**: the query listing a live table's columns and the
//!   comparison of its answer with a descriptor.
//! - **Dialects**: Postgres (default, schema-qualified, `$n`) and SQLite
//!   (unqualified, `?n`).
//!
//! Nothing here touches a connection; execution belongs to the ORM layer.

pub mod builder;
pub mod expr;
pub mod introspect;
pub mod join;
pub mod select;
pub mod table;
pub mod types;

pub use builder::{Delete, Insert, Update};
pub use expr::{ColumnRef, Dialect, Expr, TableRef, Where};
pub use introspect::TableColumn;
pub use join::{Join, JoinType};
pub use select::{AliasedColumn, Select};
pub use table::{ColumnSpec, References, Table};
pub use types::{ReferentialAction, SqlType};
