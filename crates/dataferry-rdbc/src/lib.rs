//! # dataferry-rdbc
//!
//! Relational database connectivity for the dataferry migration pipeline.
//!
//! ## Features
//!
//! - **Two backends**: MySQL (mysql_async) and PostgreSQL (tokio-postgres) behind one API
//! - **Scoped connections**: every operation opens, uses and closes its own
//!   connection unless the caller shares one
//! - **Tabular datasets**: typed, uniquely named columns with an implicit row index
//! - **Retrying executor**: fixed-interval retry for reads and transactional writes
//! - **Table loader**: append/replace/fail policies with chunked bulk INSERTs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dataferry_rdbc::prelude::*;
//!
//! let params = ConnectionParams::new("mysql", "localhost", 3306, "root", "secret", "raw");
//! let client = DatabaseClient::from_params(params)?;
//!
//! let dataset = client.read_dataset("SELECT * FROM user", &[], None).await?;
//! client
//!     .load(&dataset, "user_copy", &LoadOptions::replace("raw"), None)
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod dataset;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod loader;
pub mod provider;
pub mod retry;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::DatabaseClient;
    pub use crate::connection::{
        Connection, ConnectionFactory, ConnectionParams, DatabaseType, SensitiveString,
        Transaction,
    };
    pub use crate::dataset::Dataset;
    pub use crate::dialect::{dialect_for, MySqlDialect, PostgresDialect, SqlDialect};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::executor::QueryExecutor;
    pub use crate::loader::{ExistencePolicy, LoadOptions, LoadReport, TableAction, TableLoader};
    pub use crate::provider::{ConnectionHandle, ConnectionProvider, ScopedConnection};
    pub use crate::retry::RetryPolicy;
    pub use crate::types::{ColumnMetadata, Row, Value};
}

// Re-export commonly used items at crate root
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use types::Value;
