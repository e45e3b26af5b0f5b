//! Table descriptors and DDL rendering.

use crate::builder::{Delete, Insert, Update};
use crate::expr::{ColumnRef, Dialect, TableRef};
use crate::select::Select;
use crate::types::{ReferentialAction, SqlType};
use relmodel_core::{SqlQuery, quote_ident};

/// Foreign key target of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct References {
    pub table: TableRef,
    pub column: String,
    pub on_delete: ReferentialAction,
}

/// One column of a table descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    pub index: bool,
    pub auto_increment: bool,
    pub references: Option<References>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            primary_key: false,
            unique: false,
            not_null: false,
            index: false,
            auto_increment: false,
            references: None,
        }
    }

    /// The type actually rendered: auto-incrementing integers become `SERIAL`.
    pub fn effective_type(&self) -> SqlType {
        if self.auto_increment && self.sql_type.is_integer() {
            SqlType::Serial
        } else {
            self.sql_type.clone()
        }
    }

    /// Whether the rendered column accepts NULL.
    pub fn is_nullable(&self) -> bool {
        !(self.not_null || self.primary_key)
    }

    /// Render the column definition used inside `CREATE TABLE`.
    ///
    /// A primary key implies NOT NULL, so the constraint is not repeated.
    pub fn definition(&self, dialect: Dialect) -> String {
        let mut def = format!(
            "{} {}",
            quote_ident(&self.name),
            self.effective_type().sql_name(dialect)
        );

        if self.primary_key {
            def.push_str(" PRIMARY KEY");
            if self.auto_increment && dialect == Dialect::Sqlite {
                def.push_str(" AUTOINCREMENT");
            }
        } else {
            if self.not_null {
                def.push_str(" NOT NULL");
            }
            if self.unique {
                def.push_str(" UNIQUE");
            }
        }

        if let Some(references) = &self.references {
            def.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                references.table.render(dialect),
                quote_ident(&references.column),
                references.on_delete.as_sql()
            ));
        }

        def
    }
}

/// Rendering descriptor for one model's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub table: TableRef,
    pub columns: Vec<ColumnSpec>,
}

impl Table {
    pub fn new(table: TableRef, columns: Vec<ColumnSpec>) -> Self {
        Self { table, columns }
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn column(&self, name: impl Into<String>) -> ColumnRef {
        self.table.column(name)
    }

    /// Columns flagged for a secondary index.
    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|column| column.index)
    }

    /// `CREATE TABLE IF NOT EXISTS ...`
    pub fn create_if_not_exists(&self, dialect: Dialect) -> SqlQuery {
        let columns: Vec<_> = self
            .columns
            .iter()
            .map(|column| column.definition(dialect))
            .collect();
        SqlQuery::raw(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table.render(dialect),
            columns.join(", ")
        ))
    }

    /// `DROP TABLE IF EXISTS ...`
    pub fn drop_if_exists(&self, dialect: Dialect) -> SqlQuery {
        SqlQuery::raw(format!("DROP TABLE IF EXISTS {}", self.table.render(dialect)))
    }

    /// Index names are `{table}_{column}` and live in the table's schema.
    fn index_name(&self, column: &str, dialect: Dialect) -> String {
        let name = format!("{}_{}", self.table.name, column);
        TableRef::new(self.table.schema.clone(), name).render(dialect)
    }

    pub fn create_index(&self, column: &str, dialect: Dialect) -> SqlQuery {
        let name = quote_ident(&format!("{}_{}", self.table.name, column));
        SqlQuery::raw(format!(
            "CREATE INDEX {} ON {} ({})",
            name,
            self.table.render(dialect),
            quote_ident(column)
        ))
    }

    pub fn drop_index(&self, column: &str, dialect: Dialect) -> SqlQuery {
        SqlQuery::raw(format!(
            "DROP INDEX IF EXISTS {}",
            self.index_name(column, dialect)
        ))
    }

    pub fn select(&self) -> Select {
        Select::new(self.table.clone())
    }

    pub fn insert(&self) -> Insert {
        Insert::new(self.table.clone())
    }

    pub fn update(&self) -> Update {
        Update::new(self.table.clone())
    }

    pub fn delete(&self) -> Delete {
        Delete::new(self.table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_column() -> ColumnSpec {
        ColumnSpec {
            primary_key: true,
            not_null: true,
            auto_increment: true,
            ..ColumnSpec::new("id", SqlType::Integer)
        }
    }

    fn test_table() -> Table {
        Table::new(
            TableRef::new("public", "test"),
            vec![id_column(), ColumnSpec::new("name", SqlType::VarChar(None))],
        )
    }

    fn student_table() -> Table {
        Table::new(
            TableRef::new("public", "student"),
            vec![
                id_column(),
                ColumnSpec {
                    not_null: true,
                    index: true,
                    references: Some(References {
                        table: TableRef::new("public", "teacher"),
                        column: "id".to_string(),
                        on_delete: ReferentialAction::Cascade,
                    }),
                    ..ColumnSpec::new("teacher_id", SqlType::Integer)
                },
            ],
        )
    }

    #[test]
    fn test_create_table_postgres() {
        assert_eq!(
            test_table().create_if_not_exists(Dialect::Postgres).text,
            "CREATE TABLE IF NOT EXISTS \"public\".\"test\" (\"id\" SERIAL PRIMARY KEY, \"name\" VARCHAR)"
        );
    }

    #[test]
    fn test_create_table_sqlite() {
        assert_eq!(
            test_table().create_if_not_exists(Dialect::Sqlite).text,
            "CREATE TABLE IF NOT EXISTS \"test\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"name\" VARCHAR)"
        );
    }

    #[test]
    fn test_drop_table() {
        assert_eq!(
            test_table().drop_if_exists(Dialect::Postgres).text,
            "DROP TABLE IF EXISTS \"public\".\"test\""
        );
    }

    #[test]
    fn test_foreign_key_column() {
        let sql = student_table().create_if_not_exists(Dialect::Postgres).text;
        assert!(sql.contains(
            "\"teacher_id\" INT NOT NULL REFERENCES \"public\".\"teacher\"(\"id\") ON DELETE CASCADE"
        ));

        let sql = student_table().create_if_not_exists(Dialect::Sqlite).text;
        assert!(sql.contains(
            "\"teacher_id\" INTEGER NOT NULL REFERENCES \"teacher\"(\"id\") ON DELETE CASCADE"
        ));
    }

    #[test]
    fn test_unique_column() {
        let column = ColumnSpec {
            unique: true,
            not_null: true,
            ..ColumnSpec::new("email", SqlType::VarChar(Some(120)))
        };
        assert_eq!(
            column.definition(Dialect::Postgres),
            "\"email\" VARCHAR(120) NOT NULL UNIQUE"
        );
    }

    #[test]
    fn test_indexes() {
        let table = student_table();
        let indexed: Vec<_> = table.indexed_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(indexed, vec!["teacher_id"]);

        assert_eq!(
            table.create_index("teacher_id", Dialect::Postgres).text,
            "CREATE INDEX \"student_teacher_id\" ON \"public\".\"student\" (\"teacher_id\")"
        );
        assert_eq!(
            table.drop_index("teacher_id", Dialect::Postgres).text,
            "DROP INDEX IF EXISTS \"public\".\"student_teacher_id\""
        );
        assert_eq!(
            table.drop_index("teacher_id", Dialect::Sqlite).text,
            "DROP INDEX IF EXISTS \"student_teacher_id\""
        );
    }
}
