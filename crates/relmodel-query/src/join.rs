//! JOIN clause types.

use crate::expr::{Dialect, Expr, TableRef};
use relmodel_core::Value;

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: TableRef,
    /// ON condition
    pub on: Expr,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: TableRef, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table,
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: TableRef, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table,
            on,
        }
    }

    /// Render ` LEFT JOIN table ON (...)` including the leading space.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        format!(
            " {} {} ON {}",
            self.join_type.as_str(),
            self.table.render(dialect),
            self.on.build(dialect, params)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_join_render() {
        let student = TableRef::new("public", "student");
        let teacher = TableRef::new("public", "teacher");
        let join = Join::left(
            teacher.clone(),
            teacher.column("id").eq_column(&student.column("teacher_id")),
        );

        let mut params = Vec::new();
        assert_eq!(
            join.build(Dialect::Postgres, &mut params),
            " LEFT JOIN \"public\".\"teacher\" ON (\"public\".\"teacher\".\"id\" = \"public\".\"student\".\"teacher_id\")"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_inner_join_keyword() {
        let a = TableRef::new("main", "a");
        let join = Join::inner(a.clone(), a.column("id").eq(1_i64));
        let mut params = Vec::new();
        assert_eq!(
            join.build(Dialect::Sqlite, &mut params),
            " INNER JOIN \"a\" ON (\"a\".\"id\" = ?1)"
        );
    }
}
