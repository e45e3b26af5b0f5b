//! SELECT and COUNT rendering.

use crate::expr::{ColumnRef, Dialect, Expr, TableRef, Where};
use crate::join::Join;
use relmodel_core::{SqlQuery, quote_ident};

/// A column selected under an alias, e.g. `"teacher.name"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedColumn {
    pub column: ColumnRef,
    pub alias: String,
}

/// SELECT query over one base table.
///
/// The base table is always selected with `*`; joined columns are added
/// explicitly under dotted aliases so rows can be degrouped afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    from: TableRef,
    columns: Vec<AliasedColumn>,
    joins: Vec<Join>,
    where_clause: Option<Where>,
}

impl Select {
    /// Create a new SELECT over `from`.
    pub fn new(from: TableRef) -> Self {
        Self {
            from,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
        }
    }

    /// Select an additional column under `alias`.
    #[must_use]
    pub fn column(mut self, column: ColumnRef, alias: impl Into<String>) -> Self {
        self.columns.push(AliasedColumn {
            column,
            alias: alias.into(),
        });
        self
    }

    /// Add a JOIN clause.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// AND every predicate in order.
    #[must_use]
    pub fn filter_all(self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs.into_iter().fold(self, Select::filter)
    }

    /// Build the SELECT query.
    pub fn build(&self, dialect: Dialect) -> SqlQuery {
        let from = self.from.render(dialect);
        let mut sql = format!("SELECT {from}.*");
        for aliased in &self.columns {
            sql.push_str(", ");
            sql.push_str(&aliased.column.render(dialect));
            sql.push_str(" AS ");
            sql.push_str(&quote_ident(&aliased.alias));
        }
        sql.push_str(" FROM ");
        sql.push_str(&from);
        self.finish(sql, dialect)
    }

    /// Build a `COUNT` over the same FROM, joins and predicates.
    pub fn build_count(&self, dialect: Dialect) -> SqlQuery {
        let from = self.from.render(dialect);
        let counted = match dialect {
            Dialect::Postgres => format!("{from}.*"),
            Dialect::Sqlite => "*".to_string(),
        };
        let sql = format!("SELECT COUNT({counted}) AS \"count\" FROM {from}");
        self.finish(sql, dialect)
    }

    fn finish(&self, mut sql: String, dialect: Dialect) -> SqlQuery {
        let mut params = Vec::new();
        for join in &self.joins {
            sql.push_str(&join.build(dialect, &mut params));
        }
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(&where_clause.build(dialect, &mut params));
        }
        SqlQuery::new(sql, params)
    }
}
