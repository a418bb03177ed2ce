//! Error types for dataferry-rdbc
//!
//! Three failure kinds surface from the public operations:
//! - `Connection`: a database cannot be opened or stops answering
//! - `Query`: a read or write statement failed (carries the SQL text)
//! - `Load`: a dataset could not be written into its destination table
//!
//! The remaining variants describe local problems (bad configuration,
//! malformed datasets, unconvertible values) and are usually wrapped
//! into one of the three kinds above before reaching a caller.

use std::fmt;
use thiserror::Error;

/// Result type for dataferry-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by the wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors
    Connection,
    /// Query execution errors
    Query,
    /// Table load errors
    Load,
    /// Transaction control errors
    Transaction,
    /// Type conversion errors
    TypeConversion,
    /// Configuration error
    Configuration,
    /// Dataset or table shape errors
    Schema,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally transient.
    ///
    /// The query executor retries regardless of this classification; it is
    /// exposed for callers that want to make their own decision.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Transaction)
    }
}

/// Main error type for dataferry-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Writing a dataset into a table failed
    #[error("load error for table {table}: {message}")]
    Load {
        table: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transaction control failed (BEGIN/COMMIT/ROLLBACK)
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (duplicate columns, ragged rows, column mismatch)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Load { .. } => ErrorCategory::Load,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// SQL text attached to a query error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a driver-level query error, keeping the driver error as source
    pub fn driver(
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: source.to_string(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap any failure of a statement into a query failure for that statement.
    ///
    /// Query errors that already carry SQL are passed through unchanged.
    pub fn query_failed(sql: impl Into<String>, cause: Error) -> Self {
        match cause {
            Self::Query { sql: Some(_), .. } => cause,
            Self::Query {
                message,
                sql: None,
                source,
            } => Self::Query {
                message,
                sql: Some(sql.into()),
                source,
            },
            other => Self::Query {
                message: other.to_string(),
                sql: Some(sql.into()),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create a load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap any failure during a table load into a load failure
    pub fn load_failed(table: impl Into<String>, cause: Error) -> Self {
        match cause {
            Self::Load { .. } => cause,
            other => Self::Load {
                table: table.into(),
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transaction error with source
    pub fn transaction_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Load => write!(f, "load"),
            Self::Transaction => write!(f, "transaction"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Transaction.is_retriable());

        assert!(!ErrorCategory::Query.is_retriable());
        assert!(!ErrorCategory::Load.is_retriable());
        assert!(!ErrorCategory::Schema.is_retriable());
    }

    #[test]
    fn test_query_failed_keeps_connection_cause() {
        let err = Error::query_failed("SELECT 1", Error::connection("refused"));
        assert_eq!(err.category(), ErrorCategory::Query);
        assert_eq!(err.sql(), Some("SELECT 1"));

        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection error: refused"));
    }

    #[test]
    fn test_query_failed_passes_through_sql_errors() {
        let inner = Error::query_with_sql("syntax error", "SELECT * FORM users");
        let err = Error::query_failed("SELECT other", inner);
        assert_eq!(err.sql(), Some("SELECT * FORM users"));
    }

    #[test]
    fn test_load_failed_wraps_once() {
        let err = Error::load_failed("public.t", Error::schema("width mismatch"));
        assert_eq!(err.category(), ErrorCategory::Load);
        assert!(err.to_string().contains("public.t"));

        let again = Error::load_failed("other", err);
        assert!(again.to_string().contains("public.t"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("syntax error", "SELECT * FORM users");
        assert!(err.to_string().contains("syntax error"));
    }
}
