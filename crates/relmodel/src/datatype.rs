//! Declared column data types.
//!
//! Every column is declared with a [`DataType`], either directly or by name
//! through [`DataType::from_name`]. There is no inference from Rust types.

use relmodel_core::{Error, Result, SchemaErrorKind, Value};
use relmodel_query::SqlType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest `VARCHAR` a `STRING` column may declare.
pub const MAX_STRING_LENGTH: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Boolean,
    /// `INT`, or `SERIAL` when auto-incrementing
    Int,
    /// `VARCHAR` or `VARCHAR(n)`
    String,
    Text,
    /// `TIMESTAMP WITH TIME ZONE`
    Timestamp,
}

pub const BOOLEAN: DataType = DataType::Boolean;
pub const INT: DataType = DataType::Int;
pub const STRING: DataType = DataType::String;
pub const TEXT: DataType = DataType::Text;
pub const TIMESTAMP: DataType = DataType::Timestamp;

impl DataType {
    /// Look a data type up by name (case-insensitive).
    ///
    /// Accepts `NUMBER`, `INT`, `INTEGER`, `SERIAL`, `STRING`, `BOOL`,
    /// `BOOLEAN`, `TEXT` and `TIMESTAMP`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NUMBER" | "INT" | "INTEGER" | "SERIAL" => Ok(DataType::Int),
            "STRING" => Ok(DataType::String),
            "BOOL" | "BOOLEAN" => Ok(DataType::Boolean),
            "TEXT" => Ok(DataType::Text),
            "TIMESTAMP" => Ok(DataType::Timestamp),
            _ => Err(Error::schema(
                SchemaErrorKind::UnresolvableColumnType,
                format!("Column type '{name}' could not be determined"),
            )),
        }
    }

    /// Storage type for a column declared with this data type.
    pub fn sql_type(self, length: Option<u32>, auto_increment: bool) -> Result<SqlType> {
        match self {
            DataType::Boolean => Ok(SqlType::Boolean),
            DataType::Int if auto_increment => Ok(SqlType::Serial),
            DataType::Int => Ok(SqlType::Integer),
            DataType::String => match length {
                Some(len) if len > MAX_STRING_LENGTH => Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("String length {len} too long, use TEXT instead"),
                )),
                _ => Ok(SqlType::VarChar(length)),
            },
            DataType::Text => Ok(SqlType::Text),
            DataType::Timestamp => Ok(SqlType::TimestampTz),
        }
    }

    /// Normalize a value read from a driver into this type's canonical form.
    ///
    /// Drivers without a native boolean return integers; integer widths are
    /// unified to `BigInt`. Values that do not fit are kept as they are.
    pub fn coerce(self, value: Value) -> Value {
        match (self, &value) {
            (DataType::Boolean, Value::Int(_) | Value::BigInt(_)) => {
                value.as_bool().map_or(value, Value::Bool)
            }
            (DataType::Int, Value::Int(v)) => Value::BigInt(i64::from(*v)),
            _ => value,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int => "INT",
            DataType::String => "STRING",
            DataType::Text => "TEXT",
            DataType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}
