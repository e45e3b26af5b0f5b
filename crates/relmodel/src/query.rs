//! Query engine: translates model operations into SQL and runs them.
//!
//! Each operation comes in two halves. The `*_query` methods resolve
//! attribute names against the registry and render [`SqlQuery`] values
//! without touching a connection; the async methods render, execute on the
//! connection they are given and decode the result.
//!
//! Attribute resolution searches the queried model plus every joined
//! association target. `id` always means the queried model's own key.

use crate::association::Association;
use crate::metadata::EntityMetadata;
use crate::registry::Registry;
use relmodel_core::{
    Connection, Cx, Error, Outcome, ResolutionError, ResolutionErrorKind, Result, Row,
    SchemaErrorKind, SqlQuery, Value, try_outcome, try_result,
};
use relmodel_query::{ColumnRef, Dialect, Table, TableColumn};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Equality predicates, ANDed in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the primary key.
    pub fn by_id(id: i64) -> Self {
        Self::new().eq("id", id)
    }

    /// Add `attribute = value`, replacing an earlier predicate on the same
    /// attribute.
    #[must_use]
    pub fn eq(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        let value = value.into();
        match self.terms.iter_mut().find(|(a, _)| *a == attribute) {
            Some(term) => term.1 = value,
            None => self.terms.push((attribute, value)),
        }
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.terms
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.terms.iter().map(|(a, v)| (a.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl FromIterator<(String, Value)> for Filter {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Filter::new(), |filter, (attribute, value)| {
                filter.eq(attribute, value)
            })
    }
}

/// Renders as a JSON object, keys in insertion order.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (attribute, value)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}:{}",
                serde_json::Value::String(attribute.clone()),
                value.to_json()
            )?;
        }
        f.write_str("}")
    }
}

/// Options for `find_*` operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Associations to join in addition to the eager ones
    pub includes: Vec<String>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn include(mut self, association: impl Into<String>) -> Self {
        self.includes.push(association.into());
        self
    }
}

/// A model taking part in a query: its metadata and table descriptor.
struct QueryModel {
    metadata: EntityMetadata,
    table: Arc<Table>,
}

/// Translates model operations into SQL for one dialect.
#[derive(Debug)]
pub struct QueryEngine {
    registry: Arc<Registry>,
    dialect: Dialect,
    log_statements: bool,
}

impl QueryEngine {
    pub fn new(registry: Arc<Registry>, dialect: Dialect) -> Self {
        Self {
            registry,
            dialect,
            log_statements: true,
        }
    }

    /// Toggle the per-statement debug log.
    #[must_use]
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query_model(&self, model: &str) -> Result<QueryModel> {
        Ok(QueryModel {
            table: self.registry.table(model)?,
            metadata: self.registry.entity_metadata(model),
        })
    }

    /// Associations joined by a select: every eager one plus the included ones.
    fn included_associations<'m>(
        &self,
        metadata: &'m EntityMetadata,
        options: &FindOptions,
    ) -> Result<Vec<&'m Association>> {
        for name in &options.includes {
            if metadata.association(name).is_none() {
                return Err(Error::schema(
                    SchemaErrorKind::UnknownAssociation,
                    format!("Association {name} is not defined on {}", metadata.name),
                ));
            }
        }
        Ok(metadata
            .associations()
            .iter()
            .filter(|a| a.is_eager() || options.includes.iter().any(|i| i == a.name()))
            .collect())
    }

    /// Resolve `attribute` to exactly one column of `base` or `joined`.
    fn resolve(
        base: &QueryModel,
        joined: &[QueryModel],
        attribute: &str,
    ) -> Result<ColumnRef> {
        if attribute == "id" {
            return Ok(base.table.column("id"));
        }

        let mut matches: Vec<ColumnRef> = std::iter::once(base)
            .chain(joined)
            .filter_map(|model| {
                model
                    .metadata
                    .column_for(attribute)
                    .map(|column| model.table.column(column.name.clone()))
            })
            .collect();

        if matches.len() > 1 {
            return Err(Error::Resolution(ResolutionError {
                kind: ResolutionErrorKind::Ambiguous,
                attribute: attribute.to_string(),
                candidates: matches
                    .iter()
                    .map(|c| format!("{}.{}", c.table.name, c.name))
                    .collect(),
            }));
        }
        matches.pop().ok_or_else(|| {
            Error::Resolution(ResolutionError {
                kind: ResolutionErrorKind::Unresolved,
                attribute: attribute.to_string(),
                candidates: Vec::new(),
            })
        })
    }

    /// Physical column name for an attribute of `metadata`.
    fn column_name(metadata: &EntityMetadata, attribute: &str) -> Result<String> {
        metadata
            .column_for(attribute)
            .map(|column| column.name.clone())
            .ok_or_else(|| {
                Error::Resolution(ResolutionError {
                    kind: ResolutionErrorKind::Unresolved,
                    attribute: attribute.to_string(),
                    candidates: Vec::new(),
                })
            })
    }

    // ==================== Rendering ====================

    /// `SELECT base.*, target.col AS "assoc.col", ... FROM base LEFT JOIN ... WHERE ...`
    pub fn select_query(
        &self,
        model: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<SqlQuery> {
        let base = self.query_model(model)?;
        let associations = self.included_associations(&base.metadata, options)?;

        let mut select = base.table.select();
        let mut joined = Vec::with_capacity(associations.len());
        for association in associations {
            let target = self.query_model(&association.target_key())?;
            for column in &target.table.columns {
                select = select.column(
                    target.table.column(column.name.clone()),
                    format!("{}.{}", association.name(), column.name),
                );
            }
            select = association.join(select, self.registry.metadata())?;
            joined.push(target);
        }

        let predicates = filter
            .iter()
            .map(|(attribute, value)| {
                Self::resolve(&base, &joined, attribute).map(|column| column.eq(value.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(select.filter_all(predicates).build(self.dialect))
    }

    /// `SELECT COUNT(...) AS "count"` over the model's own columns.
    pub fn count_query(&self, model: &str, filter: &Filter) -> Result<SqlQuery> {
        let base = self.query_model(model)?;
        let predicates = filter
            .iter()
            .map(|(attribute, value)| {
                Self::resolve(&base, &[], attribute).map(|column| column.eq(value.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(base
            .table
            .select()
            .filter_all(predicates)
            .build_count(self.dialect))
    }

    /// Single-row `INSERT ... RETURNING "id"`; no values inserts defaults.
    pub fn insert_query(&self, model: &str, values: &[(String, Value)]) -> Result<SqlQuery> {
        let base = self.query_model(model)?;
        let columns = values
            .iter()
            .map(|(attribute, _)| Self::column_name(&base.metadata, attribute))
            .collect::<Result<Vec<_>>>()?;
        let mut insert = base.table.insert().returning("id");
        if !columns.is_empty() {
            insert = insert
                .columns(columns)
                .row(values.iter().map(|(_, v)| v.clone()).collect());
        }
        Ok(insert.build(self.dialect))
    }

    /// Statements inserting every row, in row order.
    ///
    /// The column list is the union of the rows' columns in declaration
    /// order, missing cells render `DEFAULT`. Dialects without `DEFAULT`
    /// cells fall back to one statement per row when rows differ in shape.
    pub fn insert_all_queries(
        &self,
        model: &str,
        rows: &[Vec<(String, Value)>],
    ) -> Result<Vec<SqlQuery>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let base = self.query_model(model)?;

        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for (attribute, value) in row {
                cells.push((Self::column_name(&base.metadata, attribute)?, value.clone()));
            }
            resolved.push(cells);
        }

        let columns: Vec<String> = base
            .metadata
            .columns()
            .iter()
            .filter(|column| {
                resolved
                    .iter()
                    .any(|row| row.iter().any(|(name, _)| *name == column.name))
            })
            .map(|column| column.name.clone())
            .collect();

        let uniform = resolved.iter().all(|row| row.len() == columns.len());
        if columns.is_empty() || (!uniform && !self.dialect.supports_default_cells()) {
            return resolved
                .iter()
                .map(|row| {
                    let values: Vec<_> = row.clone();
                    self.insert_query(model, &values)
                })
                .collect();
        }

        let mut insert = base.table.insert().columns(columns.clone()).returning("id");
        for row in &resolved {
            let cells = columns
                .iter()
                .map(|column| {
                    row.iter()
                        .find(|(name, _)| name == column)
                        .map_or(Value::Default, |(_, value)| value.clone())
                })
                .collect();
            insert = insert.row(cells);
        }
        Ok(vec![insert.build(self.dialect)])
    }

    /// `UPDATE ... SET ... WHERE id = ?`. The `id` in `values` is the sole
    /// predicate and is not itself updated. `None` when nothing but the id
    /// was given.
    pub fn update_query(&self, model: &str, values: &[(String, Value)]) -> Result<Option<SqlQuery>> {
        let base = self.query_model(model)?;
        let id = values
            .iter()
            .find(|(attribute, _)| attribute == "id")
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_null())
            .ok_or_else(|| Error::Custom(format!("Update of {model} requires an id")))?;

        let mut update = base.table.update();
        let mut assignments = 0;
        for (attribute, value) in values {
            if attribute == "id" {
                continue;
            }
            update = update.set(Self::column_name(&base.metadata, attribute)?, value.clone());
            assignments += 1;
        }
        if assignments == 0 {
            return Ok(None);
        }
        Ok(Some(
            update
                .filter(base.table.column("id").eq(id))
                .build(self.dialect),
        ))
    }

    /// `DELETE FROM ...`; an empty filter deletes every row.
    pub fn delete_query(&self, model: &str, filter: &Filter) -> Result<SqlQuery> {
        let base = self.query_model(model)?;
        let predicates = filter
            .iter()
            .map(|(attribute, value)| {
                Self::resolve(&base, &[], attribute).map(|column| column.eq(value.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(base
            .table
            .delete()
            .filter_all(predicates)
            .build(self.dialect))
    }

    /// Create the table, then drop and recreate an index per indexed column.
    pub fn create_table_queries(&self, model: &str) -> Result<Vec<SqlQuery>> {
        let table = self.registry.table(model)?;
        let indexed: Vec<&str> = table
            .indexed_columns()
            .map(|column| column.name.as_str())
            .collect();

        let mut queries = vec![table.create_if_not_exists(self.dialect)];
        queries.extend(
            indexed
                .iter()
                .map(|column| table.drop_index(column, self.dialect)),
        );
        queries.extend(
            indexed
                .iter()
                .map(|column| table.create_index(column, self.dialect)),
        );
        Ok(queries)
    }

    pub fn drop_table_query(&self, model: &str) -> Result<SqlQuery> {
        Ok(self.registry.table(model)?.drop_if_exists(self.dialect))
    }

    // ==================== Execution ====================

    /// Run one statement, logging it at debug level.
    pub async fn execute(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        query: &SqlQuery,
    ) -> Outcome<Vec<Row>, Error> {
        let started = Instant::now();
        let outcome = conn.query(cx, query).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Outcome::Ok(rows) if self.log_statements => {
                tracing::debug!(
                    sql = %query.text,
                    params = ?query.values,
                    elapsed_ms,
                    rows = rows.len(),
                    "statement executed"
                );
            }
            Outcome::Err(error) => {
                tracing::debug!(sql = %query.text, params = ?query.values, elapsed_ms, %error, "statement failed");
            }
            _ => {}
        }
        outcome
    }

    pub async fn select(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Vec<Row>, Error> {
        let query = try_result!(self.select_query(model, filter, options));
        self.execute(cx, conn, &query).await
    }

    pub async fn count(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        filter: &Filter,
    ) -> Outcome<i64, Error> {
        let query = try_result!(self.count_query(model, filter));
        let rows = try_outcome!(self.execute(cx, conn, &query).await);
        let count = rows
            .first()
            .and_then(|row| row.get_by_name("count"))
            .and_then(Value::as_i64);
        match count {
            Some(count) => Outcome::Ok(count),
            None => Outcome::Err(Error::Custom(format!("COUNT on {model} returned no count"))),
        }
    }

    /// Insert one row and return its generated id.
    pub async fn insert(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        values: &[(String, Value)],
    ) -> Outcome<i64, Error> {
        let query = try_result!(self.insert_query(model, values));
        let rows = try_outcome!(self.execute(cx, conn, &query).await);
        match rows.first().map(returned_id) {
            Some(Ok(id)) => Outcome::Ok(id),
            Some(Err(e)) => Outcome::Err(e),
            None => Outcome::Err(Error::Custom(format!("INSERT into {model} returned no id"))),
        }
    }

    /// Insert every row and return the generated ids in row order. No rows
    /// is a no-op.
    pub async fn insert_all(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        rows: &[Vec<(String, Value)>],
    ) -> Outcome<Vec<i64>, Error> {
        let queries = try_result!(self.insert_all_queries(model, rows));
        let mut ids = Vec::with_capacity(rows.len());
        for query in &queries {
            let returned = try_outcome!(self.execute(cx, conn, query).await);
            for row in &returned {
                ids.push(try_result!(returned_id(row)));
            }
        }
        Outcome::Ok(ids)
    }

    /// Update the row identified by the `id` in `values`.
    pub async fn modify(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        values: &[(String, Value)],
    ) -> Outcome<(), Error> {
        let Some(query) = try_result!(self.update_query(model, values)) else {
            tracing::trace!(model, "update with no changed columns skipped");
            return Outcome::Ok(());
        };
        try_outcome!(self.execute(cx, conn, &query).await);
        Outcome::Ok(())
    }

    pub async fn delete(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
        filter: &Filter,
    ) -> Outcome<(), Error> {
        let query = try_result!(self.delete_query(model, filter));
        try_outcome!(self.execute(cx, conn, &query).await);
        Outcome::Ok(())
    }

    pub async fn create_table_if_not_exists(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
    ) -> Outcome<(), Error> {
        for query in try_result!(self.create_table_queries(model)) {
            try_outcome!(self.execute(cx, conn, &query).await);
        }
        Outcome::Ok(())
    }

    pub async fn drop_table_if_exists(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
    ) -> Outcome<(), Error> {
        let query = try_result!(self.drop_table_query(model));
        try_outcome!(self.execute(cx, conn, &query).await);
        Outcome::Ok(())
    }

    /// Compare the model's live table with its declared columns.
    ///
    /// Every difference is logged; any difference fails with
    /// [`SchemaErrorKind::TableMismatch`].
    pub async fn verify_table(
        &self,
        cx: &Cx,
        conn: &dyn Connection,
        model: &str,
    ) -> Outcome<(), Error> {
        let table = try_result!(self.registry.table(model));
        let query = table.columns_query(self.dialect);
        let rows = try_outcome!(self.execute(cx, conn, &query).await);
        let columns: Vec<TableColumn> = rows
            .iter()
            .filter_map(|row| TableColumn::from_row(row, self.dialect))
            .collect();

        let problems = table.compare_columns(&columns, self.dialect);
        if problems.is_empty() {
            tracing::debug!(model, columns = columns.len(), "table matches model");
            return Outcome::Ok(());
        }
        for problem in &problems {
            tracing::warn!(model, %problem, "table does not match model");
        }
        let info = try_result!(self.registry.model(model));
        Outcome::Err(Error::schema(
            SchemaErrorKind::TableMismatch,
            format!("Columns do not match for {}: {}", info.name(), problems.join("; ")),
        ))
    }
}

fn returned_id(row: &Row) -> Result<i64> {
    row.get_named::<i64>("id")
}
