//! Application entry point: configuration, the built registry, the pool and
//! the context store in one handle.

use crate::entity::Entity;
use crate::query::QueryEngine;
use crate::registry::Registry;
use crate::transaction::{self, ResponseTransaction};
use relmodel_core::{
    ConnectionPool, ContextStore, Cx, Error, ExecutionContext, Outcome, Result, try_outcome,
    try_result,
};
use relmodel_query::Dialect;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// ORM configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// SQL dialect statements are rendered in
    pub dialect: Dialect,
    /// Schema for models that do not name one
    pub default_schema: String,
    /// Log every executed statement at debug level
    pub log_statements: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            default_schema: crate::metadata::DEFAULT_SCHEMA.to_string(),
            log_statements: true,
        }
    }
}

impl OrmConfig {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    pub fn default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }
}

/// A running ORM instance.
pub struct Orm {
    config: OrmConfig,
    engine: Arc<QueryEngine>,
    pool: Arc<dyn ConnectionPool>,
    contexts: Arc<ContextStore>,
}

impl Orm {
    /// Build `registry` and take ownership of `pool`.
    pub fn init<P>(config: OrmConfig, mut registry: Registry, pool: P) -> Result<Self>
    where
        P: ConnectionPool + 'static,
    {
        registry
            .metadata_mut()
            .set_default_schema(config.default_schema.clone());
        registry.build()?;
        tracing::debug!(
            models = registry.models().len(),
            dialect = ?config.dialect,
            "orm initialized"
        );

        let engine =
            QueryEngine::new(Arc::new(registry), config.dialect).log_statements(config.log_statements);
        Ok(Self {
            config,
            engine: Arc::new(engine),
            pool: Arc::new(pool),
            contexts: ContextStore::new(),
        })
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.engine.registry()
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// A fresh top-level execution context.
    pub fn context(&self) -> ExecutionContext {
        self.contexts.root()
    }

    /// Run `unit_of_work` in a transaction; see
    /// [`start_transaction`](transaction::start_transaction).
    pub async fn transaction<T, F, Fut>(
        &self,
        cx: &Cx,
        ctx: &ExecutionContext,
        unit_of_work: F,
    ) -> Outcome<T, Error>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        transaction::start_transaction(cx, &*self.pool, &self.engine, ctx, unit_of_work).await
    }

    /// Begin a transaction closed by a response status.
    pub async fn response_managed(
        &self,
        cx: &Cx,
        ctx: &ExecutionContext,
    ) -> Outcome<ResponseTransaction, Error> {
        transaction::start_response_managed_transaction(cx, &*self.pool, &self.engine, ctx).await
    }

    /// Create every table in dependency order, in one transaction.
    pub async fn sync(&self, cx: &Cx) -> Outcome<(), Error> {
        let models = try_result!(self.registry().ordered_models());
        let root = self.context();
        self.transaction(cx, &root, |ctx| async move {
            for model in &models {
                try_outcome!(Entity::sync(cx, &ctx, model.key()).await);
            }
            Outcome::Ok(())
        })
        .await
    }

    /// Drop every table in reverse dependency order, in one transaction.
    pub async fn drop_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let models = try_result!(self.registry().ordered_models());
        let root = self.context();
        self.transaction(cx, &root, |ctx| async move {
            for model in models.iter().rev() {
                try_outcome!(Entity::drop_table(cx, &ctx, model.key()).await);
            }
            Outcome::Ok(())
        })
        .await
    }

    /// Check every table against its model, in one transaction.
    pub async fn verify(&self, cx: &Cx) -> Outcome<(), Error> {
        let models = try_result!(self.registry().ordered_models());
        let root = self.context();
        self.transaction(cx, &root, |ctx| async move {
            for model in &models {
                try_outcome!(Entity::verify_table(cx, &ctx, model.key()).await);
            }
            Outcome::Ok(())
        })
        .await
    }

    /// Close the pool.
    pub async fn end(self, cx: &Cx) -> Outcome<(), Error> {
        tracing::debug!("closing orm");
        self.pool.close(cx).await
    }
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("config", &self.config)
            .field("live_contexts", &self.contexts.len())
            .finish_non_exhaustive()
    }
}
