//! relmodel - relational model mapping with associations and
//! context-scoped transactions.
//!
//! Models are declared at runtime as a [`ModelDef`] (columns, associations,
//! inheritance, hooks) and collected in a [`Registry`]. Building the registry
//! resolves association targets, synthesizes foreign keys and through models
//! and renders one table descriptor per model. Instances are dynamic
//! [`Entity`] values whose attributes track their own dirtiness, optionally
//! wrapped by typed structs implementing [`Model`].
//!
//! Every database operation runs inside a [`Transaction`] found through the
//! [`ExecutionContext`] it is handed, so deep call chains share one
//! transaction without passing it explicitly.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.define(ModelDef::new("Teacher").column("name", STRING))?;
//! registry.define(
//!     ModelDef::new("Student")
//!         .column("name", STRING)
//!         .many_to_one("teacher", "Teacher"),
//! )?;
//!
//! let orm = Orm::init(OrmConfig::new(Dialect::Sqlite), registry, pool)?;
//! orm.sync(cx).await;
//!
//! let root = orm.context();
//! orm.transaction(cx, &root, |ctx| async move {
//!     let mut student = Entity::new(orm.registry(), "student")?;
//!     student.set("name", "Ada")?;
//!     student.save(cx, &ctx).await
//! })
//! .await;
//! ```

pub mod association;
pub mod attribute;
pub mod datatype;
pub mod entity;
pub mod group;
pub mod metadata;
pub mod model;
pub mod orm;
pub mod query;
pub mod record;
pub mod registry;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use relmodel_core::{
    ChainId, Connection, ConnectionPool, ContextStore, Cx, Error, ExecutionContext, FromValue,
    Outcome, PooledConnection, RecordError, RecordErrorKind, Result, Row, SchemaError,
    SchemaErrorKind, SqlQuery, TransactionError, TransactionErrorKind, Value, try_outcome,
    try_result,
};
pub use relmodel_pool::{ConnectionFactory, Pool, PoolConfig, PoolStats};
pub use relmodel_query::{Dialect, ReferentialAction};

pub use association::{Association, AssociationInput, AssociationKind, AssociationValue};
pub use attribute::Attribute;
pub use datatype::{BOOLEAN, DataType, INT, STRING, TEXT, TIMESTAMP};
pub use entity::Entity;
pub use group::group_data;
pub use metadata::{ColumnDefinition, EntityMetadata, MetadataRegistry};
pub use model::{DerivedColumn, Model, ModelDef, ModelEvents, ModelInfo};
pub use orm::{Orm, OrmConfig};
pub use query::{Filter, FindOptions, QueryEngine};
pub use record::{Record, RecordValue};
pub use registry::{ModelRegistry, Registry};
pub use transaction::{
    ResponseTransaction, TRANSACTION, Transaction, TransactionState,
    start_response_managed_transaction, start_transaction,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Association, Cx, DataType, Dialect, Entity, Error, ExecutionContext, Filter, FindOptions,
        Model, ModelDef, ModelEvents, Orm, OrmConfig, Outcome, PoolConfig, Record, RecordValue,
        Registry, Result, Transaction, Value, accessors, try_outcome, try_result,
    };
    pub use crate::datatype::{BOOLEAN, INT, STRING, TEXT, TIMESTAMP};
}
