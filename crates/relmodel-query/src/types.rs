//! Column storage types and referential actions.

use crate::expr::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL column types a model column can be declared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    /// Auto-incrementing integer (Postgres `SERIAL`)
    Serial,
    /// `VARCHAR` with an optional length
    VarChar(Option<u32>),
    Text,
    /// Timestamp with time zone
    TimestampTz,
}

impl SqlType {
    /// Get the SQL type name for this type in the given dialect.
    pub fn sql_name(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (SqlType::Boolean, _) => "BOOLEAN".to_string(),
            (SqlType::Integer, Dialect::Postgres) => "INT".to_string(),
            (SqlType::Integer | SqlType::Serial, Dialect::Sqlite) => "INTEGER".to_string(),
            (SqlType::Serial, Dialect::Postgres) => "SERIAL".to_string(),
            (SqlType::VarChar(None), _) => "VARCHAR".to_string(),
            (SqlType::VarChar(Some(len)), _) => format!("VARCHAR({len})"),
            (SqlType::Text, _) => "TEXT".to_string(),
            (SqlType::TimestampTz, _) => "TIMESTAMP WITH TIME ZONE".to_string(),
        }
    }

    /// Check if this is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::Serial)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name(Dialect::Postgres))
    }
}

/// Referential action for foreign key constraints (ON DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    NoAction,
    /// Restrict - same as NO ACTION, checked immediately.
    Restrict,
    /// Cascade - automatically delete referencing rows.
    #[default]
    Cascade,
    /// Set null - set referencing columns to NULL.
    SetNull,
    /// Set default - set referencing columns to their default values.
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}
