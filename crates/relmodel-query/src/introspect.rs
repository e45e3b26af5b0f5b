//! Live table layout and its comparison with a [`Table`] descriptor.
//!
//! SQLite reports columns through `PRAGMA table_info`, Postgres through
//! `information_schema.columns`. Both answers decode into [`TableColumn`], so
//! the comparison itself does not depend on the dialect.

use crate::expr::Dialect;
use crate::table::{ColumnSpec, Table};
use crate::types::SqlType;
use relmodel_core::{Row, SqlQuery, Value, quote_ident};

/// One column as the database reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    /// Column name
    pub name: String,
    /// Declared type (SQLite) or `data_type` (Postgres)
    pub data_type: String,
    /// `character_maximum_length`, Postgres only
    pub char_length: Option<u32>,
    /// Default expression
    pub default: Option<String>,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Part of the primary key, SQLite only
    pub primary_key: bool,
}

impl TableColumn {
    /// Decode one row answered by [`Table::columns_query`].
    ///
    /// Rows without a name or a type yield `None`.
    pub fn from_row(row: &Row, dialect: Dialect) -> Option<Self> {
        match dialect {
            Dialect::Sqlite => {
                let primary_key = row.get_named::<i64>("pk").unwrap_or(0) > 0;
                let not_null = row.get_named::<i64>("notnull").unwrap_or(0) != 0;
                Some(Self {
                    name: row.get_named("name").ok()?,
                    data_type: row.get_named("type").ok()?,
                    char_length: None,
                    default: row
                        .get_named::<Option<String>>("dflt_value")
                        .ok()
                        .flatten(),
                    // an INTEGER PRIMARY KEY never holds NULL whatever `notnull` says
                    nullable: !(not_null || primary_key),
                    primary_key,
                })
            }
            Dialect::Postgres => Some(Self {
                name: row.get_named("column_name").ok()?,
                data_type: row.get_named("data_type").ok()?,
                char_length: row
                    .get_named::<Option<i64>>("character_maximum_length")
                    .ok()
                    .flatten()
                    .and_then(|len| u32::try_from(len).ok()),
                default: row
                    .get_named::<Option<String>>("column_default")
                    .ok()
                    .flatten(),
                nullable: row.get_named::<String>("is_nullable").ok()? == "YES",
                primary_key: false,
            }),
        }
    }

    /// The model column type this layout corresponds to, or `None` for a type
    /// no model column renders.
    ///
    /// Postgres marks `SERIAL` by a `nextval(...)` default. SQLite has no
    /// serial type, so an `INTEGER` primary key stands for one.
    pub fn sql_type(&self, dialect: Dialect) -> Option<SqlType> {
        match dialect {
            Dialect::Postgres => match self.data_type.to_lowercase().as_str() {
                "integer" if self.is_sequence_default() => Some(SqlType::Serial),
                "integer" => Some(SqlType::Integer),
                "character varying" => Some(SqlType::VarChar(self.char_length)),
                "text" => Some(SqlType::Text),
                "boolean" => Some(SqlType::Boolean),
                "timestamp with time zone" => Some(SqlType::TimestampTz),
                _ => None,
            },
            Dialect::Sqlite => {
                let declared = self.data_type.trim().to_uppercase();
                if let Some(len) = declared
                    .strip_prefix("VARCHAR(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    return len.trim().parse().ok().map(|len| SqlType::VarChar(Some(len)));
                }
                match declared.as_str() {
                    "INTEGER" | "INT" if self.primary_key => Some(SqlType::Serial),
                    "INTEGER" | "INT" => Some(SqlType::Integer),
                    "VARCHAR" => Some(SqlType::VarChar(None)),
                    "TEXT" => Some(SqlType::Text),
                    "BOOLEAN" => Some(SqlType::Boolean),
                    "TIMESTAMP WITH TIME ZONE" => Some(SqlType::TimestampTz),
                    _ => None,
                }
            }
        }
    }

    fn is_sequence_default(&self) -> bool {
        self.default
            .as_deref()
            .is_some_and(|default| default.starts_with("nextval"))
    }
}

impl ColumnSpec {
    /// Every difference between this column and its live counterpart.
    pub fn compare(&self, live: &TableColumn, dialect: Dialect) -> Vec<String> {
        let mut problems = Vec::new();
        let expected = self.effective_type();
        match live.sql_type(dialect) {
            Some(found) if found == expected => {}
            Some(found) => problems.push(format!(
                "column {}: expected {expected}, found {found}",
                self.name
            )),
            None => problems.push(format!(
                "column {}: expected {expected}, found unsupported type {}",
                self.name, live.data_type
            )),
        }
        if live.nullable != self.is_nullable() {
            let nullability = |nullable: bool| if nullable { "NULL" } else { "NOT NULL" };
            problems.push(format!(
                "column {}: expected {}, found {}",
                self.name,
                nullability(self.is_nullable()),
                nullability(live.nullable)
            ));
        }
        problems
    }
}

impl Table {
    /// The statement listing the table's live columns in ordinal order.
    pub fn columns_query(&self, dialect: Dialect) -> SqlQuery {
        match dialect {
            Dialect::Sqlite => SqlQuery::raw(format!(
                "PRAGMA table_info({})",
                quote_ident(&self.table.name)
            )),
            Dialect::Postgres => SqlQuery::new(
                "SELECT column_name, data_type, character_maximum_length, column_default, \
                 is_nullable FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                vec![
                    Value::Text(self.table.schema.clone()),
                    Value::Text(self.table.name.clone()),
                ],
            ),
        }
    }

    /// Every difference between this descriptor and the live `columns`,
    /// empty when they agree.
    ///
    /// A live column must be declared and match in type and nullability; a
    /// declared column must exist. No live columns at all means no table.
    pub fn compare_columns(&self, columns: &[TableColumn], dialect: Dialect) -> Vec<String> {
        if columns.is_empty() {
            return vec![format!("table {} does not exist", self.table.name)];
        }

        let mut problems = Vec::new();
        for live in columns {
            match self.columns.iter().find(|spec| spec.name == live.name) {
                Some(spec) => problems.extend(spec.compare(live, dialect)),
                None => problems.push(format!("column {} is not declared", live.name)),
            }
        }
        for spec in &self.columns {
            if !columns.iter().any(|live| live.name == spec.name) {
                problems.push(format!("column {} is missing", spec.name));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::TableRef;

    fn teacher_table() -> Table {
        Table::new(
            TableRef::new("public", "teacher"),
            vec![
                ColumnSpec {
                    primary_key: true,
                    not_null: true,
                    auto_increment: true,
                    ..ColumnSpec::new("id", SqlType::Integer)
                },
                ColumnSpec {
                    not_null: true,
                    ..ColumnSpec::new("subject", SqlType::VarChar(Some(50)))
                },
                ColumnSpec::new("active", SqlType::Boolean),
            ],
        )
    }

    fn pragma_row(name: &str, declared: &str, not_null: bool, pk: bool) -> Row {
        Row::new(
            vec![
                "cid".into(),
                "name".into(),
                "type".into(),
                "notnull".into(),
                "dflt_value".into(),
                "pk".into(),
            ],
            vec![
                Value::Int(0),
                Value::Text(name.into()),
                Value::Text(declared.into()),
                Value::Int(i32::from(not_null)),
                Value::Null,
                Value::Int(i32::from(pk)),
            ],
        )
    }

    fn information_row(
        name: &str,
        data_type: &str,
        length: Option<i32>,
        default: Option<&str>,
        nullable: bool,
    ) -> Row {
        Row::new(
            vec![
                "column_name".into(),
                "data_type".into(),
                "character_maximum_length".into(),
                "column_default".into(),
                "is_nullable".into(),
            ],
            vec![
                Value::Text(name.into()),
                Value::Text(data_type.into()),
                length.map_or(Value::Null, Value::Int),
                default.map_or(Value::Null, |d| Value::Text(d.into())),
                Value::Text(if nullable { "YES" } else { "NO" }.into()),
            ],
        )
    }

    fn decode(rows: &[Row], dialect: Dialect) -> Vec<TableColumn> {
        rows.iter()
            .filter_map(|row| TableColumn::from_row(row, dialect))
            .collect()
    }

    #[test]
    fn test_columns_query_per_dialect() {
        let table = teacher_table();
        assert_eq!(
            table.columns_query(Dialect::Sqlite).text,
            r#"PRAGMA table_info("teacher")"#
        );
        let query = table.columns_query(Dialect::Postgres);
        assert!(query.text.starts_with("SELECT column_name, data_type"));
        assert_eq!(
            query.values,
            vec![Value::Text("public".into()), Value::Text("teacher".into())]
        );
    }

    #[test]
    fn test_sqlite_layout_matches() {
        let live = decode(
            &[
                pragma_row("id", "INTEGER", false, true),
                pragma_row("subject", "VARCHAR(50)", true, false),
                pragma_row("active", "BOOLEAN", false, false),
            ],
            Dialect::Sqlite,
        );
        assert!(live[0].primary_key && !live[0].nullable);
        assert!(teacher_table().compare_columns(&live, Dialect::Sqlite).is_empty());
    }

    #[test]
    fn test_postgres_layout_matches() {
        let live = decode(
            &[
                information_row(
                    "id",
                    "integer",
                    None,
                    Some("nextval('teacher_id_seq'::regclass)"),
                    false,
                ),
                information_row("subject", "character varying", Some(50), None, false),
                information_row("active", "boolean", None, None, true),
            ],
            Dialect::Postgres,
        );
        assert_eq!(live[0].sql_type(Dialect::Postgres), Some(SqlType::Serial));
        assert!(teacher_table().compare_columns(&live, Dialect::Postgres).is_empty());
    }

    #[test]
    fn test_mismatches_are_listed() {
        let live = decode(
            &[
                information_row("id", "integer", None, None, false),
                information_row("subject", "character varying", Some(80), None, true),
                information_row("nickname", "text", None, None, true),
            ],
            Dialect::Postgres,
        );
        assert_eq!(
            teacher_table().compare_columns(&live, Dialect::Postgres),
            vec![
                "column id: expected SERIAL, found INT".to_string(),
                "column subject: expected VARCHAR(50), found VARCHAR(80)".to_string(),
                "column subject: expected NOT NULL, found NULL".to_string(),
                "column nickname is not declared".to_string(),
                "column active is missing".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_type_and_missing_table() {
        let live = decode(&[pragma_row("active", "BLOB", false, false)], Dialect::Sqlite);
        let spec = ColumnSpec::new("active", SqlType::Boolean);
        assert_eq!(
            spec.compare(&live[0], Dialect::Sqlite),
            vec!["column active: expected BOOLEAN, found unsupported type BLOB".to_string()]
        );
        assert_eq!(
            teacher_table().compare_columns(&[], Dialect::Sqlite),
            vec!["table teacher does not exist".to_string()]
        );
    }
}
