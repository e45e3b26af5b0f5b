//! Dialects, table/column references and predicate expressions.

use relmodel_core::{Value, quote_ident, quote_path};
use serde::{Deserialize, Serialize};

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders, schema-qualified tables)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders, no schemas)
    Sqlite,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
        }
    }

    /// Whether table names carry their schema.
    pub const fn uses_schemas(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Whether `DEFAULT` may appear as a cell inside `VALUES (...)`.
    pub const fn supports_default_cells(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// A table as it appears in generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `"schema"."name"` for Postgres, `"name"` for SQLite.
    pub fn render(&self, dialect: Dialect) -> String {
        if dialect.uses_schemas() {
            quote_path(&[self.schema.as_str(), self.name.as_str()])
        } else {
            quote_ident(&self.name)
        }
    }

    pub fn column(&self, name: impl Into<String>) -> ColumnRef {
        ColumnRef {
            table: self.clone(),
            name: name.into(),
        }
    }
}

/// A table-qualified column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: TableRef,
    pub name: String,
}

impl ColumnRef {
    pub fn render(&self, dialect: Dialect) -> String {
        format!("{}.{}", self.table.render(dialect), quote_ident(&self.name))
    }

    /// Equality predicate against a bound parameter.
    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        Expr::Eq(
            Box::new(Expr::Column(self.clone())),
            Box::new(Expr::Param(value.into())),
        )
    }

    /// Equality predicate against another column (join conditions).
    pub fn eq_column(&self, other: &ColumnRef) -> Expr {
        Expr::Eq(
            Box::new(Expr::Column(self.clone())),
            Box::new(Expr::Column(other.clone())),
        )
    }
}

/// A predicate expression.
///
/// Every binary node renders parenthesized, so chained conjunctions nest to
/// the left: `((a = $1) AND (b = $2))`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Param(Value),
    Eq(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Render this expression, appending bound values to `params`.
    ///
    /// Placeholders are numbered from `params.len() + 1`, so a caller that
    /// has already bound values keeps a continuous numbering.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column(column) => column.render(dialect),
            Expr::Param(value) => {
                params.push(value.clone());
                dialect.placeholder(params.len())
            }
            Expr::Eq(left, right) => {
                let left = left.build(dialect, params);
                let right = right.build(dialect, params);
                format!("({left} = {right})")
            }
            Expr::And(left, right) => {
                let left = left.build(dialect, params);
                let right = right.build(dialect, params);
                format!("({left} AND {right})")
            }
        }
    }
}

/// WHERE clause built from successive conjunctions.
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    expr: Expr,
}

impl Where {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// Fold a list of predicates into one clause, or `None` when empty.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().fold(None, |clause, expr| {
            Some(match clause {
                Some(existing) => Where::and(existing, expr),
                None => Where::new(expr),
            })
        })
    }

    /// Add an AND condition.
    pub fn and(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.and(expr),
        }
    }

    /// Render ` WHERE ...` including the leading space.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        format!(" WHERE {}", self.expr.build(dialect, params))
    }
}
