//! Query executor
//!
//! Runs one statement against the provider's database with a scoped
//! connection, wrapped in the fixed-interval [`retry`] policy:
//!
//! ```text
//! retry(policy) -> connection scope -> raw driver call
//! ```
//!
//! The first attempt may reuse a caller-supplied connection. A connection
//! that saw an error is closed, so later attempts always open a fresh one.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::provider::ConnectionProvider;
use crate::retry::{retry, RetryPolicy};
use crate::types::{Row, Value};

/// Result shape of a read
#[async_trait]
trait ReadResult: Sized + Send {
    async fn fetch(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<Self>;
}

#[async_trait]
impl ReadResult for Vec<Row> {
    async fn fetch(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<Self> {
        conn.query(sql, params).await
    }
}

#[async_trait]
impl ReadResult for Dataset {
    async fn fetch(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<Self> {
        conn.query_table(sql, params).await
    }
}

/// Executes reads and writes against one database
pub struct QueryExecutor {
    provider: Arc<ConnectionProvider>,
    retry: RetryPolicy,
}

impl QueryExecutor {
    /// Executor with the default retry policy (5 attempts, 5 s apart)
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Active retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Provider used for connections
    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// Run a query and return its rows in order.
    ///
    /// Rows keep the driver's column labels, duplicates included.
    pub async fn read_rows(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<Vec<Row>> {
        let rows: Vec<Row> = self.read(query, params, existing).await?;
        info!(rows = rows.len(), "Query returned rows");
        Ok(rows)
    }

    /// Run a query and materialize its result as a dataset
    pub async fn read_dataset(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<Dataset> {
        let dataset: Dataset = self.read(query, params, existing).await?;
        let (rows, columns) = dataset.shape();
        info!(rows, columns, "Query returned dataset");
        Ok(dataset)
    }

    /// Run a modifying statement inside a transaction, returning affected rows
    pub async fn write(
        &self,
        statement: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<u64> {
        retry(&self.retry, move |attempt| {
            let conn = if attempt == 1 { existing } else { None };
            self.write_once(statement, params, conn)
        })
        .await
    }

    async fn read<T: ReadResult>(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<T> {
        retry(&self.retry, move |attempt| {
            let conn = if attempt == 1 { existing } else { None };
            self.read_once(query, params, conn)
        })
        .await
    }

    async fn read_once<T: ReadResult>(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<T> {
        let conn = match self.provider.acquire(existing).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(query = %query, error = %e, "Failed to open connection");
                return Err(Error::query_failed(query, e));
            }
        };

        if self.provider.echo() {
            info!(sql = %query, "Executing query");
        }

        let outcome = T::fetch(&*conn, query, params).await;
        match outcome {
            Ok(result) => {
                conn.release().await;
                Ok(result)
            }
            Err(e) => {
                error!(query = %query, error = %e, "Query failed");
                conn.close().await;
                Err(Error::query_failed(query, e))
            }
        }
    }

    async fn write_once(
        &self,
        statement: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<u64> {
        let conn = match self.provider.acquire(existing).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(query = %statement, error = %e, "Failed to open connection");
                return Err(Error::query_failed(statement, e));
            }
        };

        if self.provider.echo() {
            info!(sql = %statement, "Executing statement");
        }

        let tx = match conn.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(query = %statement, error = %e, "Failed to begin transaction");
                conn.close().await;
                return Err(Error::query_failed(statement, e));
            }
        };

        let executed = tx.execute(statement, params).await;
        let outcome = match executed {
            Ok(affected) => tx.commit().await.map(|_| affected),
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        };

        match outcome {
            Ok(affected) => {
                conn.release().await;
                Ok(affected)
            }
            Err(e) => {
                error!(query = %statement, error = %e, "Statement failed, rolled back");
                conn.release().await;
                Err(Error::query_failed(statement, e))
            }
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("provider", &self.provider)
            .field("retry", &self.retry)
            .finish()
    }
}
