//! Query builders for INSERT, UPDATE, DELETE operations.

use crate::expr::{Dialect, Expr, TableRef, Where};
use relmodel_core::{SqlQuery, Value, quote_ident};

/// INSERT query builder.
///
/// Rows are aligned to the builder's column list. A [`Value::Default`] cell
/// renders as the `DEFAULT` keyword instead of a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: TableRef,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    returning: Option<String>,
}

impl Insert {
    /// Create a new INSERT builder for the given table.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
            rows: Vec::new(),
            returning: None,
        }
    }

    /// Set the inserted columns.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add one row of values, aligned to the column list.
    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Add a `RETURNING` column.
    #[must_use]
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    /// Build the INSERT SQL and parameters.
    ///
    /// With no columns the statement inserts one row of defaults.
    pub fn build(&self, dialect: Dialect) -> SqlQuery {
        let mut sql = format!("INSERT INTO {}", self.table.render(dialect));
        let mut params = Vec::new();

        if self.columns.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns: Vec<_> = self.columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(" ({}) VALUES ", columns.join(", ")));

            let rows: Vec<_> = self
                .rows
                .iter()
                .map(|row| {
                    let cells: Vec<_> = row
                        .iter()
                        .map(|value| {
                            if matches!(value, Value::Default) {
                                "DEFAULT".to_string()
                            } else {
                                params.push(value.clone());
                                dialect.placeholder(params.len())
                            }
                        })
                        .collect();
                    format!("({})", cells.join(", "))
                })
                .collect();
            sql.push_str(&rows.join(", "));
        }

        if let Some(returning) = &self.returning {
            sql.push_str(" RETURNING ");
            sql.push_str(&quote_ident(returning));
        }

        SqlQuery::new(sql, params)
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: TableRef,
    set: Vec<(String, Value)>,
    where_clause: Option<Where>,
}

impl Update {
    /// Create a new UPDATE builder for the given table.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            set: Vec::new(),
            where_clause: None,
        }
    }

    /// Set a column to a value.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    /// Add a WHERE condition.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Build the UPDATE SQL and parameters.
    pub fn build(&self, dialect: Dialect) -> SqlQuery {
        let mut params = Vec::new();
        let set_clauses: Vec<_> = self
            .set
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{} = {}", quote_ident(column), dialect.placeholder(params.len()))
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table.render(dialect),
            set_clauses.join(", ")
        );
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(&where_clause.build(dialect, &mut params));
        }

        SqlQuery::new(sql, params)
    }
}

/// DELETE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: TableRef,
    where_clause: Option<Where>,
}

impl Delete {
    /// Create a new DELETE builder for the given table.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            where_clause: None,
        }
    }

    /// Add a WHERE condition.
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
        exprs.into_iter().fold(self, Delete::filter)
    }

    /// Build the DELETE SQL and parameters.
    pub fn build(&self, dialect: Dialect) -> SqlQuery {
        let mut sql = format!("DELETE FROM {}", self.table.render(dialect));
        let mut params = Vec::new();
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(&where_clause.build(dialect, &mut params));
        }
        SqlQuery::new(sql, params)
    }
}
