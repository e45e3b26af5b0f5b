//! Error types for relmodel operations.

use std::fmt;

/// The primary error type for all relmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction lifecycle errors
    Transaction(TransactionError),
    /// Pool errors
    Pool(PoolError),
    /// Model declaration and registry errors
    Schema(SchemaError),
    /// Attribute-to-column resolution errors
    Resolution(ResolutionError),
    /// Record cardinality errors (not found, multiple found)
    Record(RecordError),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost or closed during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// No transaction is published in the execution context
    NotActive,
    /// The unit of work failed and the transaction was rolled back
    RolledBack,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool exhausted (no available connections)
    Exhausted,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// The foreign-key graph between models contains a cycle
    CyclicDependency,
    /// A column's storage type could not be determined
    UnresolvableColumnType,
    /// A referenced model was never declared
    UnknownModel,
    /// A referenced association was never declared
    UnknownAssociation,
    /// Table descriptors were requested before the registry was built
    NotBuilt,
    /// Invalid model, column or association definition
    Invalid,
    /// A live table's columns differ from its model
    TableMismatch,
}

#[derive(Debug)]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub attribute: String,
    /// Qualified column names that matched (empty for unresolved attributes)
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// The attribute matched no column in the queried models
    Unresolved,
    /// The attribute matched columns in more than one queried model
    Ambiguous,
}

#[derive(Debug)]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub model: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// Zero rows where exactly one was required
    NotFound,
    /// More than one row where at most one was required
    MultipleFound,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Shorthand for a [`SchemaError`].
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a [`TransactionError`] without a source.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (busy database, exhausted pool)?
    ///
    /// Registry, resolution and record errors are programmer or data errors
    /// and are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Busy),
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    pub fn is_record_not_found(&self) -> bool {
        matches!(self, Error::Record(r) if r.kind == RecordErrorKind::NotFound)
    }

    pub fn is_multiple_records_found(&self) -> bool {
        matches!(self, Error::Record(r) if r.kind == RecordErrorKind::MultipleFound)
    }

    pub fn is_unresolved_attribute(&self) -> bool {
        matches!(self, Error::Resolution(r) if r.kind == ResolutionErrorKind::Unresolved)
    }

    pub fn is_ambiguous_attribute(&self) -> bool {
        matches!(self, Error::Resolution(r) if r.kind == ResolutionErrorKind::Ambiguous)
    }

    pub fn is_cyclic_dependency(&self) -> bool {
        matches!(self, Error::Schema(s) if s.kind == SchemaErrorKind::CyclicDependency)
    }

    pub fn is_unresolvable_column_type(&self) -> bool {
        matches!(self, Error::Schema(s) if s.kind == SchemaErrorKind::UnresolvableColumnType)
    }

    /// HTTP status a request handler should answer with for this error.
    ///
    /// Missing records map to 404; a rolled-back unit of work reports the
    /// status of its cause.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Record(r) if r.kind == RecordErrorKind::NotFound => 404,
            Error::Transaction(TransactionError {
                source: Some(inner),
                ..
            }) => inner.http_status(),
            _ => 500,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Resolution(e) => write!(f, "{}", e),
            Error::Record(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Transaction(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResolutionErrorKind::Unresolved => {
                write!(f, "No attribute match found for {}", self.attribute)
            }
            ResolutionErrorKind::Ambiguous => write!(
                f,
                "Multiple attribute matches found for {} - {}",
                self.attribute,
                self.candidates.join(", ")
            ),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RecordErrorKind::NotFound => {
                write!(f, "Record Not Found on {} with Key {}", self.model, self.key)
            }
            RecordErrorKind::MultipleFound => write!(
                f,
                "Multiple Records Found on {} with Key {}",
                self.model, self.key
            ),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ResolutionError> for Error {
    fn from(err: ResolutionError) -> Self {
        Error::Resolution(err)
    }
}

impl From<RecordError> for Error {
    fn from(err: RecordError) -> Self {
        Error::Record(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relmodel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn resolution_messages() {
        let unresolved = Error::Resolution(ResolutionError {
            kind: ResolutionErrorKind::Unresolved,
            attribute: "nickname".to_string(),
            candidates: Vec::new(),
        });
        assert_eq!(unresolved.to_string(), "No attribute match found for nickname");
        assert!(unresolved.is_unresolved_attribute());

        let ambiguous = Error::Resolution(ResolutionError {
            kind: ResolutionErrorKind::Ambiguous,
            attribute: "name".to_string(),
            candidates: vec!["student.name".to_string(), "teacher.name".to_string()],
        });
        assert_eq!(
            ambiguous.to_string(),
            "Multiple attribute matches found for name - student.name, teacher.name"
        );
        assert!(ambiguous.is_ambiguous_attribute());
    }

    #[test]
    fn record_errors_map_to_status() {
        let missing = Error::Record(RecordError {
            kind: RecordErrorKind::NotFound,
            model: "Student".to_string(),
            key: "{\"id\":4}".to_string(),
        });
        assert!(missing.is_record_not_found());
        assert_eq!(missing.http_status(), 404);
        assert_eq!(
            missing.to_string(),
            "Record Not Found on Student with Key {\"id\":4}"
        );

        let many = Error::Record(RecordError {
            kind: RecordErrorKind::MultipleFound,
            model: "Student".to_string(),
            key: "{}".to_string(),
        });
        assert!(many.is_multiple_records_found());
        assert_eq!(many.http_status(), 500);
    }

    #[test]
    fn rolled_back_transaction_preserves_cause() {
        let cause = Error::Record(RecordError {
            kind: RecordErrorKind::NotFound,
            model: "Teacher".to_string(),
            key: "{\"id\":1}".to_string(),
        });
        let err = Error::Transaction(TransactionError {
            kind: TransactionErrorKind::RolledBack,
            message: "transaction rolled back".to_string(),
            source: Some(Box::new(cause)),
        });

        assert_eq!(err.http_status(), 404);
        let source = err.source().expect("cause is kept");
        assert!(source.to_string().starts_with("Record Not Found on Teacher"));
        assert!(err.to_string().contains("transaction rolled back"));
    }

    #[test]
    fn retryable_flags() {
        let busy = Error::Query(QueryError {
            kind: QueryErrorKind::Busy,
            sql: Some("SELECT 1".to_string()),
            message: "database is locked".to_string(),
            source: None,
        });
        assert!(busy.is_retryable());
        assert_eq!(busy.sql(), Some("SELECT 1"));

        let exhausted = Error::Pool(PoolError {
            kind: PoolErrorKind::Exhausted,
            message: "pool exhausted".to_string(),
            source: None,
        });
        assert!(exhausted.is_retryable());

        let cycle = Error::schema(SchemaErrorKind::CyclicDependency, "a -> b -> a");
        assert!(cycle.is_cyclic_dependency());
        assert!(!cycle.is_retryable());
    }
}
